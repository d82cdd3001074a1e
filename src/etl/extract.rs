//! Query service trait for fetching result sets

use crate::table::Table;
use eyre::Result;

/// Executes a query and returns its complete result set
///
/// Implementors own everything about reaching the data: authentication,
/// waiting for the query to finish, and paging through the results.
///
/// # Example
/// ```no_run
/// use bqdump::etl::QueryService;
/// use bqdump::table::Table;
/// use eyre::Result;
///
/// struct EmptyService;
///
/// impl QueryService for EmptyService {
///     async fn execute(&self, _query: &str) -> Result<Table> {
///         Ok(Table::default())
///     }
/// }
/// ```
pub trait QueryService: Send + Sync {
    /// Run `query` and return every row it produces
    ///
    /// # Errors
    /// Returns an error if the query fails (authentication, missing table,
    /// invalid SQL, network, etc.)
    fn execute(&self, query: &str) -> impl std::future::Future<Output = Result<Table>> + Send;
}

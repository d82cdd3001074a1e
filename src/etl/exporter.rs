//! Export orchestration: fetch each table and persist it

use super::{QueryService, TableWriter};
use eyre::{Context, Result};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

/// Drives the fetch-then-persist loop over an ordered list of tables
///
/// Tables are exported strictly one after another. The first failure aborts
/// the run and the remaining tables are never attempted.
///
/// # Type Parameters
/// - `Q`: Query service that fetches each table
/// - `W`: Table writer that persists each result set
///
/// # Example
/// ```no_run
/// use bqdump::etl::{Exporter, QueryService};
/// use bqdump::storage::CsvWriter;
/// # use bqdump::table::Table;
/// # use eyre::Result;
/// # struct MyService;
/// # impl QueryService for MyService {
/// #     async fn execute(&self, _query: &str) -> Result<Table> { Ok(Table::default()) }
/// # }
///
/// # async fn example() -> Result<()> {
/// let exporter = Exporter::new(
///     MyService,
///     CsvWriter::new(),
///     "bigquery-public-data.thelook_ecommerce",
///     vec!["orders".to_string(), "users".to_string()],
/// );
///
/// let written = exporter.run().await?;
/// println!("Exported {} tables", written.len());
/// # Ok(())
/// # }
/// ```
pub struct Exporter<Q, W> {
    service: Q,
    writer: W,
    dataset: String,
    tables: Vec<String>,
    output_dir: PathBuf,
}

impl<Q, W> Exporter<Q, W>
where
    Q: QueryService,
    W: TableWriter,
{
    /// Create a new exporter writing into the current directory
    pub fn new(service: Q, writer: W, dataset: impl Into<String>, tables: Vec<String>) -> Self {
        Self {
            service,
            writer,
            dataset: dataset.into(),
            tables,
            output_dir: PathBuf::new(),
        }
    }

    /// Write output files into `dir` instead of the current directory
    pub fn with_output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.output_dir = dir.as_ref().to_path_buf();
        self
    }

    /// The query that selects every column and row of `table`
    pub fn query_for(&self, table: &str) -> String {
        format!("SELECT * FROM `{}.{}`", self.dataset, table)
    }

    /// Where the export of `table` is written
    pub fn destination_path_for(&self, table: &str) -> PathBuf {
        self.output_dir.join(format!("{}.csv", table))
    }

    /// Export every configured table in order
    ///
    /// Steps for each table:
    /// 1. Build the `SELECT *` query
    /// 2. Execute it through the query service
    /// 3. Write the result set to `<table>.csv`
    /// 4. Print a completion notice
    ///
    /// Returns the paths written, in table order
    ///
    /// # Errors
    /// Returns the first fetch or write error; later tables are not attempted
    pub async fn run(&self) -> Result<Vec<PathBuf>> {
        if self.tables.is_empty() {
            log::warn!("No tables configured, nothing to export");
            return Ok(Vec::new());
        }

        log::info!(
            "Exporting {} table(s) from {}",
            self.tables.len(),
            self.dataset.cyan()
        );

        let mut written = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let query = self.query_for(table);
            log::debug!("Querying {}", table);
            let result = self
                .service
                .execute(&query)
                .await
                .with_context(|| format!("Failed to fetch table {}", table))?;
            log::info!(
                "Fetched {} row(s) x {} column(s) from {}",
                result.num_rows(),
                result.num_columns(),
                table.cyan()
            );

            let path = self.destination_path_for(table);
            self.writer
                .write(&result, &path)
                .with_context(|| format!("Failed to write {}", path.display()))?;

            println!("Table {} saved as {}", table, path.display());
            written.push(path);
        }

        log::info!("✓ Exported {} table(s)", written.len());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Cell, Table};
    use std::sync::{Arc, Mutex};

    struct MockService {
        queries: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
    }

    impl QueryService for MockService {
        async fn execute(&self, query: &str) -> Result<Table> {
            self.queries.lock().unwrap().push(query.to_string());
            if let Some(name) = &self.fail_on {
                if query.contains(&format!(".{}`", name)) {
                    eyre::bail!("Not found: Table {}", name);
                }
            }
            Table::new(vec!["id".to_string()], vec![vec![Cell::Int(1)]])
        }
    }

    struct RecordingWriter(Arc<Mutex<Vec<PathBuf>>>);

    impl TableWriter for RecordingWriter {
        fn write(&self, _table: &Table, path: &Path) -> Result<()> {
            self.0.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    fn exporter(
        tables: &[&str],
        fail_on: Option<&str>,
    ) -> (
        Exporter<MockService, RecordingWriter>,
        Arc<Mutex<Vec<String>>>,
        Arc<Mutex<Vec<PathBuf>>>,
    ) {
        let queries = Arc::new(Mutex::new(Vec::new()));
        let paths = Arc::new(Mutex::new(Vec::new()));
        let exporter = Exporter::new(
            MockService {
                queries: queries.clone(),
                fail_on: fail_on.map(str::to_string),
            },
            RecordingWriter(paths.clone()),
            "bigquery-public-data.thelook_ecommerce",
            tables.iter().map(|t| t.to_string()).collect(),
        );
        (exporter, queries, paths)
    }

    #[test]
    fn test_query_and_destination() {
        let (exporter, _, _) = exporter(&["orders"], None);
        assert_eq!(
            exporter.query_for("orders"),
            "SELECT * FROM `bigquery-public-data.thelook_ecommerce.orders`"
        );
        assert_eq!(
            exporter.destination_path_for("orders"),
            PathBuf::from("orders.csv")
        );

        let exporter = exporter.with_output_dir("/tmp/out");
        assert_eq!(
            exporter.destination_path_for("orders"),
            PathBuf::from("/tmp/out/orders.csv")
        );
    }

    #[tokio::test]
    async fn test_run_in_order() {
        let (exporter, queries, paths) = exporter(&["events", "orders", "users"], None);

        let written = exporter.run().await.unwrap();
        assert_eq!(
            written,
            vec![
                PathBuf::from("events.csv"),
                PathBuf::from("orders.csv"),
                PathBuf::from("users.csv")
            ]
        );
        assert_eq!(*paths.lock().unwrap(), written);
        assert_eq!(queries.lock().unwrap().len(), 3);
        assert!(queries.lock().unwrap()[0].ends_with(".events`"));
    }

    #[tokio::test]
    async fn test_empty_run() {
        let (exporter, queries, paths) = exporter(&[], None);

        let written = exporter.run().await.unwrap();
        assert!(written.is_empty());
        assert!(queries.lock().unwrap().is_empty());
        assert!(paths.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_fast() {
        let (exporter, queries, paths) =
            exporter(&["orders", "events", "users"], Some("events"));

        let err = exporter.run().await.unwrap_err();
        assert!(err.to_string().contains("Failed to fetch table events"));
        assert!(format!("{:#}", err).contains("Not found: Table events"));

        // users is never queried, events is never written
        assert_eq!(queries.lock().unwrap().len(), 2);
        assert_eq!(*paths.lock().unwrap(), vec![PathBuf::from("orders.csv")]);
    }

    #[tokio::test]
    async fn test_write_failure_aborts() {
        struct FailingWriter;

        impl TableWriter for FailingWriter {
            fn write(&self, _table: &Table, _path: &Path) -> Result<()> {
                eyre::bail!("disk full")
            }
        }

        let queries = Arc::new(Mutex::new(Vec::new()));
        let exporter = Exporter::new(
            MockService {
                queries: queries.clone(),
                fail_on: None,
            },
            FailingWriter,
            "ds",
            vec!["a".to_string(), "b".to_string()],
        );

        let err = exporter.run().await.unwrap_err();
        assert!(err.to_string().contains("Failed to write a.csv"));
        assert_eq!(queries.lock().unwrap().len(), 1);
    }
}

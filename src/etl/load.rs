//! Table writer trait for persisting result sets

use crate::table::Table;
use eyre::Result;
use std::path::Path;

/// Serializes a [`Table`] to a file
///
/// # Example
/// ```no_run
/// use bqdump::etl::TableWriter;
/// use bqdump::table::Table;
/// use eyre::Result;
/// use std::path::Path;
///
/// struct LineCounter;
///
/// impl TableWriter for LineCounter {
///     fn write(&self, table: &Table, path: &Path) -> Result<()> {
///         std::fs::write(path, format!("{}\n", table.num_rows()))?;
///         Ok(())
///     }
/// }
/// ```
pub trait TableWriter: Send + Sync {
    /// Write `table` to `path`, replacing any existing file
    ///
    /// # Errors
    /// Returns an error if the destination can't be written
    fn write(&self, table: &Table, path: &Path) -> Result<()>;
}

//! CSV file output

use crate::etl::TableWriter;
use crate::table::Table;

use csv::{QuoteStyle, Terminator, WriterBuilder};
use eyre::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Write tables as delimited text: a header line, then one line per row
///
/// Fields are quoted only when they contain the delimiter, a quote or a line
/// break. Files are written to a temporary file next to the destination and
/// renamed into place, so a failed write never leaves a truncated file behind.
pub struct CsvWriter {
    delimiter: u8,
}

impl Default for CsvWriter {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl CsvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different field separator (e.g. `b'\t'`)
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self { delimiter }
    }

    /// Serialize `table` to any writer
    pub fn write_to(&self, table: &Table, out: impl Write) -> Result<()> {
        let mut wtr = WriterBuilder::new()
            .delimiter(self.delimiter)
            .quote_style(QuoteStyle::Necessary)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(out);

        wtr.write_record(table.columns())
            .context("Failed to write CSV header")?;
        for row in table.rows() {
            wtr.write_record(row.iter().map(|cell| cell.to_string()))
                .context("Failed to write CSV row")?;
        }
        wtr.flush().context("Failed to flush CSV output")?;
        Ok(())
    }

    /// Write `table` to `path`, replacing any existing file
    pub fn write_file(&self, table: &Table, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

        let mut temp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
        self.write_to(table, temp.as_file_mut())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o644))?;
        }

        temp.persist(path)
            .with_context(|| format!("Failed to write CSV file: {}", path.display()))?;

        log::debug!(
            "Wrote {} row(s) to {}",
            table.num_rows(),
            path.display()
        );
        Ok(())
    }
}

impl TableWriter for CsvWriter {
    fn write(&self, table: &Table, path: &Path) -> Result<()> {
        self.write_file(table, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;
    use tempfile::TempDir;

    fn orders() -> Table {
        Table::new(
            vec!["id".to_string(), "user_id".to_string(), "status".to_string()],
            vec![
                vec![Cell::Int(1), Cell::Int(10), Cell::from("Complete")],
                vec![Cell::Int(2), Cell::Int(11), Cell::from("Shipped")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_write_orders() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("orders.csv");

        CsvWriter::new().write_file(&orders(), &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "id,user_id,status\n1,10,Complete\n2,11,Shipped\n");

        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|line| line.split(',').count() == 3));
    }

    #[test]
    fn test_empty_table_writes_header() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("users.csv");
        let table = Table::new(vec!["id".to_string(), "email".to_string()], vec![]).unwrap();

        CsvWriter::new().write_file(&table, &path).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,email\n");
    }

    #[test]
    fn test_quoting_and_nulls() {
        let table = Table::new(
            vec!["name".to_string(), "note".to_string(), "price".to_string()],
            vec![vec![
                Cell::from("Smith, Jane"),
                Cell::from("say \"hi\""),
                Cell::Null,
            ]],
        )
        .unwrap();

        let mut buffer = Vec::new();
        CsvWriter::new().write_to(&table, &mut buffer).unwrap();

        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "name,note,price\n\"Smith, Jane\",\"say \"\"hi\"\"\",\n"
        );
    }

    #[test]
    fn test_custom_delimiter() {
        let mut buffer = Vec::new();
        CsvWriter::with_delimiter(b'\t')
            .write_to(&orders(), &mut buffer)
            .unwrap();
        let content = String::from_utf8(buffer).unwrap();
        assert!(content.starts_with("id\tuser_id\tstatus\n"));
    }

    #[test]
    fn test_overwrite_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("orders.csv");
        let writer = CsvWriter::new();

        let big = Table::new(
            vec!["id".to_string()],
            (0..100).map(|i| vec![Cell::Int(i)]).collect(),
        )
        .unwrap();
        writer.write_file(&big, &path).unwrap();

        writer.write_file(&orders(), &path).unwrap();
        let first = std::fs::read(&path).unwrap();
        writer.write_file(&orders(), &path).unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(String::from_utf8(first).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_creates_output_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/out/orders.csv");

        CsvWriter::new().write_file(&orders(), &path).unwrap();
        assert!(path.exists());

        // No temporary files left behind
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_unwritable_destination() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let result = CsvWriter::new().write_file(&orders(), blocker.join("orders.csv"));
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&blocker).unwrap(), "file");
    }
}

//! bqdump
//!
//! Export BigQuery tables to local CSV files, one file per table

pub mod cli;
pub mod client;
pub mod config;
pub mod etl;
pub mod storage;
pub mod table;

// Re-exports for convenience
pub use client::{BigQueryClient, Credentials};
pub use config::ExportConfig;
pub use etl::{Exporter, QueryService, TableWriter};
pub use storage::CsvWriter;
pub use table::{Cell, Table};

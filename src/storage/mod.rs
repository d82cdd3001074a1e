//! File system storage operations
//!
//! This module handles writing exported tables to disk.

mod csv_writer;

pub use csv_writer::CsvWriter;

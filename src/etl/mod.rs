//! Core export abstractions
//!
//! This module provides the trait seams of the export pipeline, a
//! [`QueryService`] that fetches result sets and a [`TableWriter`] that
//! persists them, plus the [`Exporter`] that drives one through the other.

mod exporter;
mod extract;
mod load;

pub use exporter::Exporter;
pub use extract::QueryService;
pub use load::TableWriter;

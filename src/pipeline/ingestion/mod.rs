// Pipeline ingestion: reading source files into row batches and archiving them

pub mod archive;
pub mod source;

use crate::domain::SourceKind;
use crate::pipeline::storage::Row;

/// Rows read from one source file, before any cleaning.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBatch {
    /// File name of the source (no directory), used for lineage
    pub source_file: String,
    pub kind: SourceKind,
    /// Column names in file order, trimmed
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RawBatch {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn missing_columns<'a>(&self, expected: &[&'a str]) -> Vec<&'a str> {
        expected
            .iter()
            .copied()
            .filter(|c| !self.has_column(c))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub use archive::archive_file;
pub use source::{list_batch_files, read_batch};

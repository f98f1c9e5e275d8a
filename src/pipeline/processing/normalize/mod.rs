//! Normalization of raw batches into typed records.
//!
//! Each source kind has its own normalizer. Row-level failures never abort a
//! batch: the row is routed to quarantine with a reason code. Only file-level
//! problems (missing columns, unresolvable province) fail the whole batch.

pub mod error_rows;
pub mod incident;
pub mod keys;
pub mod registry;
pub mod values;

use chrono::Utc;
use serde::Serialize;

use crate::domain::{to_row, QuarantineRecord};
use crate::error::{LakehouseError, Result, ValidationError};
use crate::observability::metrics;
use crate::pipeline::ingestion::RawBatch;
use crate::pipeline::storage::Row;

pub use error_rows::ErrorRowsNormalizer;
pub use incident::IncidentNormalizer;
pub use keys::{is_normalized, normalize_key};
pub use registry::{is_registry_file, province_from_filename, RegistryNormalizer};

/// Outcome of normalizing one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch<T> {
    /// Rows that passed every check
    pub clean: Vec<T>,
    /// Rows that failed, with reason codes
    pub quarantined: Vec<QuarantineRecord>,
    /// Rows intentionally ignored (blank lines, barangay sub-rows)
    pub skipped: usize,
}

impl<T> Default for NormalizedBatch<T> {
    fn default() -> Self {
        Self {
            clean: Vec::new(),
            quarantined: Vec::new(),
            skipped: 0,
        }
    }
}

impl<T: Serialize> NormalizedBatch<T> {
    /// Clean records as storage rows.
    pub fn clean_rows(&self) -> Result<Vec<Row>> {
        self.clean.iter().map(to_row).collect()
    }
}

/// Trait for turning a raw batch into typed records.
pub trait Normalizer {
    type Output;

    /// Normalize every row of `batch`. Errors mean the whole file is unusable.
    fn normalize(&self, batch: &RawBatch) -> Result<NormalizedBatch<Self::Output>>;
}

/// Normalize a batch by its source kind, returning storage rows.
///
/// Registry batches take their province from the file name.
pub fn normalize(batch: &RawBatch) -> Result<NormalizedBatch<Row>> {
    use crate::domain::SourceKind;

    let result = match batch.kind {
        SourceKind::Incident => rows_of(IncidentNormalizer.normalize(batch)?)?,
        SourceKind::Registry => {
            let province = province_from_filename(&batch.source_file).ok_or_else(|| {
                LakehouseError::SourceFormat {
                    path: batch.source_file.clone(),
                    message: "cannot determine province from file name".to_string(),
                }
            })?;
            rows_of(RegistryNormalizer::new(province).normalize(batch)?)?
        }
        SourceKind::ErrorFile => {
            let quarantined = ErrorRowsNormalizer.normalize(batch)?.clean;
            NormalizedBatch {
                clean: Vec::new(),
                quarantined,
                skipped: 0,
            }
        }
    };
    metrics::normalize::batch(
        batch.kind.as_str(),
        result.clean.len(),
        result.quarantined.len(),
        result.skipped,
    );
    Ok(result)
}

fn rows_of<T: Serialize>(batch: NormalizedBatch<T>) -> Result<NormalizedBatch<Row>> {
    Ok(NormalizedBatch {
        clean: batch.clean_rows()?,
        quarantined: batch.quarantined,
        skipped: batch.skipped,
    })
}

/// Best-effort context carried into a quarantine record.
#[derive(Debug, Default)]
pub(crate) struct RowContext {
    pub source_row_number: Option<i64>,
    pub province: Option<String>,
    pub municipality: Option<String>,
    pub year: Option<i64>,
}

pub(crate) fn quarantine(
    batch: &RawBatch,
    raw: &Row,
    error: ValidationError,
    context: RowContext,
) -> QuarantineRecord {
    QuarantineRecord {
        source_kind: batch.kind,
        source_file: batch.source_file.clone(),
        source_row_number: context.source_row_number,
        reason: error.reason,
        detail: Some(error.to_string()),
        province: context.province,
        municipality: context.municipality,
        year: context.year,
        raw: raw.clone(),
        quarantined_at: Utc::now(),
    }
}

use chrono::Utc;

use super::keys::normalize_key;
use super::values::{parse_integer, text};
use super::{NormalizedBatch, Normalizer};
use crate::domain::QuarantineRecord;
use crate::error::{LakehouseError, ReasonCode, Result};
use crate::pipeline::ingestion::RawBatch;

/// Columns the upstream sanitizer's error export must carry.
pub const ESSENTIAL_COLUMNS: [&str; 17] = [
    "year",
    "event_date_start",
    "event_date_end",
    "province",
    "municipality",
    "commodity",
    "disaster_category",
    "disaster_name",
    "area_partially_damaged_ha",
    "area_totally_damaged_ha",
    "area_total_affected_ha",
    "farmers_affected",
    "losses_php_production_cost",
    "losses_php_farm_gate",
    "losses_php_grand_total",
    "source_row_number",
    "error_reason",
];

/// Converts the designated error file into quarantine records.
///
/// Every row of the file already failed upstream validation, so every row
/// becomes a record (in `clean`) with reason `upstream_validation`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorRowsNormalizer;

impl Normalizer for ErrorRowsNormalizer {
    type Output = QuarantineRecord;

    fn normalize(&self, batch: &RawBatch) -> Result<NormalizedBatch<QuarantineRecord>> {
        let mut out = NormalizedBatch::default();
        if batch.is_empty() {
            return Ok(out);
        }
        let missing = batch.missing_columns(&ESSENTIAL_COLUMNS);
        if !missing.is_empty() {
            return Err(LakehouseError::SourceFormat {
                path: batch.source_file.clone(),
                message: format!("essential columns missing: {}", missing.join(", ")),
            });
        }

        let quarantined_at = Utc::now();
        for raw in &batch.rows {
            let optional_int = |column: &str| {
                text(raw, column).and_then(|_| parse_integer(raw.get(column)).ok())
            };
            out.clean.push(QuarantineRecord {
                source_kind: batch.kind,
                source_file: batch.source_file.clone(),
                source_row_number: optional_int("source_row_number"),
                reason: ReasonCode::UpstreamValidation,
                detail: text(raw, "error_reason"),
                province: text(raw, "province").map(|p| normalize_key(&p)),
                municipality: text(raw, "municipality").map(|m| normalize_key(&m)),
                year: optional_int("year"),
                raw: raw.clone(),
                quarantined_at,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceKind;
    use crate::pipeline::storage::Row;
    use serde_json::{json, Value};

    fn row(overrides: Value) -> Row {
        let mut row: Row = ESSENTIAL_COLUMNS
            .iter()
            .map(|c| (c.to_string(), json!("")))
            .collect();
        for (k, v) in overrides.as_object().unwrap() {
            row.insert(k.clone(), v.clone());
        }
        row
    }

    fn batch(columns: &[&str], rows: Vec<Row>) -> RawBatch {
        RawBatch {
            source_file: "erroneous_rows.csv".to_string(),
            kind: SourceKind::ErrorFile,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn test_every_row_becomes_upstream_validation_record() {
        let rows = vec![
            row(json!({"province": "aklan", "year": "2023", "source_row_number": "88",
                       "error_reason": "negative area"})),
            row(json!({"province": "", "year": "n/a", "error_reason": "bad year"})),
        ];
        let out = ErrorRowsNormalizer
            .normalize(&batch(&ESSENTIAL_COLUMNS, rows))
            .unwrap();
        assert_eq!(out.clean.len(), 2);
        let first = &out.clean[0];
        assert_eq!(first.reason, ReasonCode::UpstreamValidation);
        assert_eq!(first.detail.as_deref(), Some("negative area"));
        assert_eq!(first.province.as_deref(), Some("AKLAN"));
        assert_eq!(first.year, Some(2023));
        assert_eq!(first.source_row_number, Some(88));
        assert_eq!(first.source_kind, SourceKind::ErrorFile);

        let second = &out.clean[1];
        assert_eq!(second.province, None);
        assert_eq!(second.year, None);
    }

    #[test]
    fn test_missing_essential_columns_fail_the_file() {
        let err = ErrorRowsNormalizer
            .normalize(&batch(&["year", "province"], vec![row(json!({}))]))
            .unwrap_err();
        assert!(matches!(err, LakehouseError::SourceFormat { .. }));
    }
}

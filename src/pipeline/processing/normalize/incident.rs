use std::sync::OnceLock;

use chrono::Datelike;
use regex::Regex;

use super::keys::normalize_key;
use super::values::{parse_date, parse_integer, parse_number, quarter_of_month, text};
use super::{quarantine, NormalizedBatch, Normalizer, RowContext};
use crate::constants::UNKNOWN_MUNICIPALITY;
use crate::domain::IncidentRecord;
use crate::error::{ReasonCode, Result, ValidationError};
use crate::pipeline::ingestion::RawBatch;
use crate::pipeline::storage::Row;

/// Area and loss columns, all coerced to floats.
const AREA_AND_LOSS_COLUMNS: [&str; 7] = [
    "area_partially_damaged_ha",
    "area_totally_damaged_ha",
    "area_total_affected_ha",
    "volume_loss_mt",
    "losses_php_production_cost",
    "losses_php_farm_gate",
    "losses_php_grand_total",
];

fn commodity_code_prefix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+\s*-\s*").expect("valid commodity pattern"))
}

/// Normalizer for disaster incident batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncidentNormalizer;

impl Normalizer for IncidentNormalizer {
    type Output = IncidentRecord;

    fn normalize(&self, batch: &RawBatch) -> Result<NormalizedBatch<IncidentRecord>> {
        let mut out = NormalizedBatch::default();
        for (index, raw) in batch.rows.iter().enumerate() {
            let mut context = RowContext {
                source_row_number: text(raw, "source_row_number")
                    .and_then(|_| parse_integer(raw.get("source_row_number")).ok())
                    .or(Some(index as i64 + 1)),
                ..RowContext::default()
            };
            match normalize_row(batch, raw, &mut context) {
                Ok(record) => out.clean.push(record),
                Err(error) => out.quarantined.push(quarantine(batch, raw, error, context)),
            }
        }
        Ok(out)
    }
}

fn type_error(field: &str, detail: String) -> ValidationError {
    ValidationError::new(ReasonCode::TypeError, field, detail)
}

fn number(raw: &Row, column: &str) -> std::result::Result<f64, ValidationError> {
    parse_number(raw.get(column)).map_err(|e| type_error(column, e))
}

fn normalize_row(
    batch: &RawBatch,
    raw: &Row,
    context: &mut RowContext,
) -> std::result::Result<IncidentRecord, ValidationError> {
    // Keys first so quarantined rows still carry them when available
    let province = text(raw, "province").map(|p| normalize_key(&p));
    let municipality = text(raw, "municipality")
        .map(|m| normalize_key(&m))
        .unwrap_or_else(|| UNKNOWN_MUNICIPALITY.to_string());
    context.province = province.clone();
    context.municipality = Some(municipality.clone());

    let event_date_start = parse_date(raw.get("event_date_start"))
        .map_err(|e| type_error("event_date_start", e))?;
    let event_date_end =
        parse_date(raw.get("event_date_end")).map_err(|e| type_error("event_date_end", e))?;

    let year = match text(raw, "year") {
        Some(_) => parse_integer(raw.get("year")).map_err(|e| type_error("year", e))?,
        None => match event_date_start {
            Some(date) => date.year() as i64,
            None => {
                return Err(ValidationError::new(
                    ReasonCode::MissingField,
                    "year",
                    "no year and no event_date_start",
                ))
            }
        },
    };
    context.year = Some(year);

    let province = province.ok_or_else(|| {
        ValidationError::new(ReasonCode::MissingProvince, "province", "province is blank")
    })?;

    let quarter = match text(raw, "quarter") {
        Some(_) => {
            let q = parse_integer(raw.get("quarter")).map_err(|e| type_error("quarter", e))?;
            if !(1..=4).contains(&q) {
                return Err(ValidationError::new(
                    ReasonCode::InvalidQuarter,
                    "quarter",
                    format!("quarter {} is outside 1-4", q),
                ));
            }
            q
        }
        None => match event_date_start {
            Some(date) => quarter_of_month(date.month()),
            None => {
                return Err(ValidationError::new(
                    ReasonCode::MissingQuarter,
                    "quarter",
                    "no quarter and no event_date_start",
                ))
            }
        },
    };

    let mut metrics = [0.0; AREA_AND_LOSS_COLUMNS.len()];
    for (slot, column) in metrics.iter_mut().zip(AREA_AND_LOSS_COLUMNS) {
        *slot = number(raw, column)?;
    }
    let farmers_affected = parse_integer(raw.get("farmers_affected"))
        .map_err(|e| type_error("farmers_affected", e))?;

    let commodity = text(raw, "commodity")
        .map(|c| commodity_code_prefix().replace(&c, "").trim().to_string())
        .filter(|c| !c.is_empty());

    Ok(IncidentRecord {
        year,
        quarter,
        event_date_start,
        event_date_end,
        province,
        municipality,
        commodity,
        disaster_type_raw: text(raw, "disaster_type_raw"),
        disaster_category: text(raw, "disaster_category").map(|c| normalize_key(&c)),
        disaster_name: text(raw, "disaster_name"),
        area_partially_damaged_ha: metrics[0],
        area_totally_damaged_ha: metrics[1],
        area_total_affected_ha: metrics[2],
        farmers_affected,
        volume_loss_mt: metrics[3],
        losses_php_production_cost: metrics[4],
        losses_php_farm_gate: metrics[5],
        losses_php_grand_total: metrics[6],
        sanitation_remarks: text(raw, "sanitation_remarks"),
        source_batch: batch.source_file.clone(),
        source_row_number: context.source_row_number.unwrap_or_default(),
    })
}

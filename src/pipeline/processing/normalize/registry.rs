use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use super::keys::normalize_key;
use super::values::{is_blank, parse_integer, parse_number, text};
use super::{quarantine, NormalizedBatch, Normalizer, RowContext};
use crate::constants::REGISTRY_FILENAME_PATTERN;
use crate::domain::RegistryRecord;
use crate::error::{LakehouseError, ReasonCode, Result, ValidationError};
use crate::pipeline::ingestion::RawBatch;
use crate::pipeline::storage::Row;

/// Column names of the registry sheet as exported from the workbook.
const RAW_NAME: &str = "Municipality/Brgy";
const RAW_COUNT: &str = "Count of Rice Farmers";
const RAW_AREA: &str = "Total Declared Rice Area";
const EXPECTED_RAW_COLUMNS: [&str; 3] = [RAW_NAME, RAW_COUNT, RAW_AREA];

/// Column names of an already-cleaned registry file.
const CLEAN_NAME: &str = "municipality";
const CLEAN_COUNT: &str = "registered_rice_farmers";
const CLEAN_AREA: &str = "total_declared_rice_area_ha";
const EXPECTED_CLEAN_COLUMNS: [&str; 3] = [CLEAN_NAME, CLEAN_COUNT, CLEAN_AREA];

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(REGISTRY_FILENAME_PATTERN).expect("valid registry pattern"))
}

fn municipality_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z\s-]+$").expect("valid municipality pattern"))
}

/// Province named by a registry file, e.g. `RSBSA Aklan Rice Farmers.csv` -> `AKLAN`.
pub fn province_from_filename(file_name: &str) -> Option<String> {
    filename_pattern()
        .captures(file_name)
        .and_then(|c| c.get(1))
        .map(|m| normalize_key(m.as_str()))
        .filter(|p| !p.is_empty())
}

/// Whether a file name looks like a registry sheet.
pub fn is_registry_file(file_name: &str) -> bool {
    province_from_filename(file_name).is_some()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// Workbook export: municipality rows in capitals with barangay sub-rows
    Raw,
    Clean,
}

/// Normalizer for farmer registry batches. The province is an explicit
/// parameter, never read from row content.
#[derive(Debug, Clone)]
pub struct RegistryNormalizer {
    province: String,
}

impl RegistryNormalizer {
    pub fn new(province: impl AsRef<str>) -> Self {
        Self {
            province: normalize_key(province.as_ref()),
        }
    }

    fn detect_layout(&self, batch: &RawBatch) -> Result<Layout> {
        if batch.has_column(RAW_NAME) || batch.has_column(RAW_COUNT) {
            let missing = batch.missing_columns(&EXPECTED_RAW_COLUMNS);
            if missing.is_empty() {
                return Ok(Layout::Raw);
            }
            return Err(missing_columns_error(batch, &missing));
        }
        let missing = batch.missing_columns(&EXPECTED_CLEAN_COLUMNS);
        if missing.is_empty() {
            Ok(Layout::Clean)
        } else {
            Err(missing_columns_error(batch, &EXPECTED_RAW_COLUMNS))
        }
    }
}

fn missing_columns_error(batch: &RawBatch, missing: &[&str]) -> LakehouseError {
    LakehouseError::SourceFormat {
        path: batch.source_file.clone(),
        message: format!("expected columns missing: {}", missing.join(", ")),
    }
}

impl Normalizer for RegistryNormalizer {
    type Output = RegistryRecord;

    fn normalize(&self, batch: &RawBatch) -> Result<NormalizedBatch<RegistryRecord>> {
        let mut out = NormalizedBatch::default();
        if batch.is_empty() {
            return Ok(out);
        }
        let layout = self.detect_layout(batch)?;
        let (name_col, count_col, area_col) = match layout {
            Layout::Raw => (RAW_NAME, RAW_COUNT, RAW_AREA),
            Layout::Clean => (CLEAN_NAME, CLEAN_COUNT, CLEAN_AREA),
        };

        for (index, raw) in batch.rows.iter().enumerate() {
            let context = RowContext {
                source_row_number: Some(index as i64 + 1),
                province: Some(self.province.clone()),
                municipality: text(raw, name_col).map(|m| normalize_key(&m)),
                year: None,
            };

            let name = match text(raw, name_col) {
                Some(name) => name,
                None if is_blank(raw, count_col) && is_blank(raw, area_col) => {
                    out.skipped += 1;
                    continue;
                }
                None => {
                    let error = ValidationError::new(
                        ReasonCode::MissingMunicipality,
                        name_col,
                        "municipality name is blank",
                    );
                    out.quarantined.push(quarantine(batch, raw, error, context));
                    continue;
                }
            };

            if layout == Layout::Raw && !is_municipality_row(&name, raw) {
                debug!("Skipping sub-municipality row {:?} in {}", name, batch.source_file);
                out.skipped += 1;
                continue;
            }

            match self.record(batch, raw, &name, name_col, count_col, area_col) {
                Ok(record) => out.clean.push(record),
                Err(error) => out.quarantined.push(quarantine(batch, raw, error, context)),
            }
        }
        Ok(out)
    }
}

impl RegistryNormalizer {
    fn record(
        &self,
        batch: &RawBatch,
        raw: &Row,
        name: &str,
        name_col: &str,
        count_col: &str,
        area_col: &str,
    ) -> std::result::Result<RegistryRecord, ValidationError> {
        let municipality = normalize_key(name);
        let registered_rice_farmers = parse_integer(raw.get(count_col))
            .map_err(|e| ValidationError::new(ReasonCode::TypeError, count_col, e))?;
        let total_declared_rice_area_ha = parse_number(raw.get(area_col))
            .map_err(|e| ValidationError::new(ReasonCode::TypeError, area_col, e))?;

        let attributes = raw
            .iter()
            .filter(|(k, _)| {
                let k = k.as_str();
                k != name_col && k != count_col && k != area_col && k != "province"
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(RegistryRecord {
            province: self.province.clone(),
            municipality,
            registered_rice_farmers,
            total_declared_rice_area_ha,
            source_file: batch.source_file.clone(),
            attributes,
        })
    }
}

/// Municipality rows in the workbook export are written in capitals and carry
/// both totals; barangay rows are mixed case.
fn is_municipality_row(name: &str, raw: &Row) -> bool {
    municipality_name_pattern().is_match(name)
        && !is_blank(raw, RAW_COUNT)
        && !is_blank(raw, RAW_AREA)
}

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LakehouseError, ReasonCode, Result};
use crate::pipeline::storage::Row;

/// Where a batch of rows came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Incident,
    Registry,
    ErrorFile,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Incident => "incident",
            SourceKind::Registry => "registry",
            SourceKind::ErrorFile => "error_file",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One disaster incident after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub year: i64,
    pub quarter: i64,
    pub event_date_start: Option<NaiveDate>,
    pub event_date_end: Option<NaiveDate>,
    pub province: String,
    pub municipality: String,
    pub commodity: Option<String>,
    pub disaster_type_raw: Option<String>,
    pub disaster_category: Option<String>,
    pub disaster_name: Option<String>,
    pub area_partially_damaged_ha: f64,
    pub area_totally_damaged_ha: f64,
    pub area_total_affected_ha: f64,
    pub farmers_affected: i64,
    pub volume_loss_mt: f64,
    pub losses_php_production_cost: f64,
    pub losses_php_farm_gate: f64,
    pub losses_php_grand_total: f64,
    pub sanitation_remarks: Option<String>,
    pub source_batch: String,
    pub source_row_number: i64,
}

/// Registered rice farmers for one municipality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub province: String,
    pub municipality: String,
    pub registered_rice_farmers: i64,
    pub total_declared_rice_area_ha: f64,
    pub source_file: String,
    /// Every other column of the sheet row.
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
}

/// A row that failed validation, kept with its original content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub source_kind: SourceKind,
    pub source_file: String,
    pub source_row_number: Option<i64>,
    pub reason: ReasonCode,
    pub detail: Option<String>,
    pub province: Option<String>,
    pub municipality: Option<String>,
    pub year: Option<i64>,
    pub raw: serde_json::Map<String, Value>,
    pub quarantined_at: DateTime<Utc>,
}

/// Convert a record into a storage row.
pub fn to_row<T: Serialize>(record: &T) -> Result<Row> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(LakehouseError::Config(format!(
            "record serialized to a non-object value: {}",
            other
        ))),
    }
}

/// Convert a storage row back into a record.
pub fn from_row<T: DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_record_row_round_trip() {
        let record = RegistryRecord {
            province: "AKLAN".into(),
            municipality: "IBAJAY".into(),
            registered_rice_farmers: 200,
            total_declared_rice_area_ha: 150.5,
            source_file: "RSBSA Aklan Rice Farmers.csv".into(),
            attributes: serde_json::Map::new(),
        };
        let row = to_row(&record).unwrap();
        assert_eq!(row["registered_rice_farmers"], json!(200));
        let back: RegistryRecord = from_row(row).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_source_kind_names() {
        assert_eq!(SourceKind::ErrorFile.to_string(), "error_file");
        assert_eq!(
            serde_json::to_value(SourceKind::Registry).unwrap(),
            json!("registry")
        );
    }
}

//! Partitioned table store.
//!
//! Tables are sets of immutable row segments plus a version log of snapshots.
//! The [`TableStore`] trait is implemented by [`FsTableStore`] (durable, used
//! by the binary) and [`InMemoryTableStore`] (tests and embedding). Both share
//! the mode planning in [`plan`] so write semantics cannot drift apart.

pub mod fs;
pub mod in_memory;
pub mod lock;
pub mod manifest;
pub mod plan;
pub mod schema;
pub mod segment;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub use fs::FsTableStore;
pub use in_memory::InMemoryTableStore;
pub use lock::LockPolicy;
pub use schema::{ColumnSpec, ColumnType, Schema};

/// One stored row: column name to JSON scalar (or object for `Json` columns).
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Append,
    Overwrite,
    DynamicOverwrite,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Append => "append",
            WriteMode::Overwrite => "overwrite",
            WriteMode::DynamicOverwrite => "dynamic_overwrite",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "append" => Ok(WriteMode::Append),
            "overwrite" => Ok(WriteMode::Overwrite),
            "dynamic_overwrite" | "dynamic" => Ok(WriteMode::DynamicOverwrite),
            other => Err(format!(
                "unknown write mode '{}' (expected append, overwrite or dynamic_overwrite)",
                other
            )),
        }
    }
}

/// Equality predicates pushed down into a read.
///
/// A predicate on the partition column prunes whole partitions; other
/// predicates prune segments by their min/max statistics and then filter rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadFilter {
    predicates: BTreeMap<String, Value>,
}

impl ReadFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.predicates.insert(column.to_string(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.predicates.get(column)
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn predicates(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.predicates.iter()
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.predicates
            .iter()
            .all(|(column, expected)| row.get(column).map_or(false, |v| values_equal(v, expected)))
    }
}

/// Value equality where numbers compare by magnitude (`2023` equals `2023.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Render a scalar as a partition key. Null, empty strings, arrays and
/// objects cannot key a partition.
pub fn partition_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteOutcome {
    pub table: String,
    pub version: u64,
    pub mode: WriteMode,
    pub rows_written: usize,
    pub partitions_written: Vec<String>,
    pub segments_written: usize,
}

/// Rows returned by a read together with the snapshot version they came from.
#[derive(Debug, Clone)]
pub struct TableScan {
    pub version: u64,
    pub rows: Vec<Row>,
    pub partitions_pruned: usize,
    pub segments_pruned: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionInfo {
    pub value: String,
    pub rows: usize,
    pub segments: usize,
}

/// Summary of a table's latest snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub table: String,
    pub version: u64,
    pub committed_at: DateTime<Utc>,
    pub partition_column: Option<String>,
    pub schema: Schema,
    pub total_rows: usize,
    pub partitions: Vec<PartitionInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VacuumReport {
    pub table: String,
    pub versions_removed: usize,
    pub files_removed: usize,
    pub bytes_freed: u64,
}

/// Storage trait for partitioned tables.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Write `rows` under `mode`. `partition_key` names the partition column
    /// for a new table or an overwrite; existing tables keep theirs.
    async fn write(
        &self,
        table: &str,
        rows: Vec<Row>,
        mode: WriteMode,
        partition_key: Option<&str>,
    ) -> Result<WriteOutcome>;

    /// Read the latest committed snapshot. Missing tables are `TableNotFound`.
    async fn read(&self, table: &str, filter: &ReadFilter) -> Result<TableScan>;

    /// Describe the latest snapshot, `None` if the table was never written.
    async fn describe(&self, table: &str) -> Result<Option<TableInfo>>;

    /// Drop snapshots beyond `retain_versions` and unreferenced segment files.
    async fn vacuum(&self, table: &str, retain_versions: usize) -> Result<VacuumReport>;

    /// Names of all tables with at least one committed snapshot.
    async fn list_tables(&self) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_write_mode_parsing() {
        assert_eq!("append".parse::<WriteMode>().unwrap(), WriteMode::Append);
        assert_eq!(
            "dynamic-overwrite".parse::<WriteMode>().unwrap(),
            WriteMode::DynamicOverwrite
        );
        assert!("upsert".parse::<WriteMode>().is_err());
        assert_eq!(
            serde_json::to_string(&WriteMode::DynamicOverwrite).unwrap(),
            "\"dynamic_overwrite\""
        );
    }

    #[test]
    fn test_filter_matches_numbers_by_value() {
        let filter = ReadFilter::all().eq("year", 2023).eq("province", "AKLAN");
        assert!(filter.matches(&row(json!({"year": 2023.0, "province": "AKLAN"}))));
        assert!(!filter.matches(&row(json!({"year": 2022, "province": "AKLAN"}))));
        assert!(!filter.matches(&row(json!({"province": "AKLAN"}))));
        assert!(ReadFilter::all().matches(&row(json!({}))));
    }

    #[test]
    fn test_partition_value_rejects_empty_and_null() {
        assert_eq!(partition_value(&json!("AKLAN")), Some("AKLAN".to_string()));
        assert_eq!(partition_value(&json!(2023)), Some("2023".to_string()));
        assert_eq!(partition_value(&json!("")), None);
        assert_eq!(partition_value(&Value::Null), None);
        assert_eq!(partition_value(&json!({"a": 1})), None);
    }
}

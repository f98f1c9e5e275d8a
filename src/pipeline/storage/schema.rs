use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Row;
use crate::error::{LakehouseError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    Json,
    /// Only nulls seen so far; adopts the first concrete type written.
    Null,
}

impl ColumnType {
    pub fn of(value: &Value) -> ColumnType {
        match value {
            Value::Null => ColumnType::Null,
            Value::Bool(_) => ColumnType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => ColumnType::Integer,
            Value::Number(_) => ColumnType::Float,
            Value::String(s) if is_iso_date(s) => ColumnType::Date,
            Value::String(_) => ColumnType::Text,
            Value::Array(_) | Value::Object(_) => ColumnType::Json,
        }
    }

    /// Least type holding both, if any.
    fn unify(self, other: ColumnType) -> Option<ColumnType> {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Null, t) | (t, Null) => Some(t),
            (Integer, Float) | (Float, Integer) => Some(Float),
            (Date, Text) | (Text, Date) => Some(Text),
            _ => None,
        }
    }

    /// Whether values of `incoming` may be stored in a column of this type.
    fn accepts(self, incoming: ColumnType) -> bool {
        use ColumnType::*;
        matches!(
            (self, incoming),
            (_, Null) | (Null, _) | (Float, Integer) | (Text, Date)
        ) || self == incoming
    }

    pub fn supports_stats(self) -> bool {
        matches!(
            self,
            ColumnType::Text | ColumnType::Integer | ColumnType::Float | ColumnType::Date
        )
    }
}

fn is_iso_date(s: &str) -> bool {
    s.len() == 10 && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// Column set of a table, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnSpec>,
}

impl Schema {
    /// Infer a schema from a batch. A column absent from some rows is nullable.
    pub fn infer(table: &str, rows: &[Row]) -> Result<Schema> {
        let mut seen: BTreeMap<String, (ColumnType, usize, bool)> = BTreeMap::new();
        for (index, row) in rows.iter().enumerate() {
            for (name, value) in row {
                let ty = ColumnType::of(value);
                let entry = seen
                    .entry(name.clone())
                    .or_insert((ColumnType::Null, 0, false));
                entry.0 = entry.0.unify(ty).ok_or_else(|| LakehouseError::SchemaMismatch {
                    table: table.to_string(),
                    message: format!(
                        "column '{}' mixes {:?} and {:?} (row {})",
                        name, entry.0, ty, index
                    ),
                })?;
                entry.1 += 1;
                entry.2 |= value.is_null();
            }
        }
        let columns = seen
            .into_iter()
            .map(|(name, (column_type, count, has_null))| ColumnSpec {
                name,
                column_type,
                nullable: has_null || count < rows.len(),
            })
            .collect();
        Ok(Schema { columns })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Check an incoming batch schema against this one and return the merged
    /// schema. New columns and incompatible types are rejected.
    pub fn merge(&self, table: &str, incoming: &Schema) -> Result<Schema> {
        // A table created from an empty batch adopts the first real schema
        if self.is_empty() {
            return Ok(incoming.clone());
        }
        let mismatch = |message: String| LakehouseError::SchemaMismatch {
            table: table.to_string(),
            message,
        };

        for column in &incoming.columns {
            let existing = self.column(&column.name).ok_or_else(|| {
                mismatch(format!("unknown column '{}' (schema evolution is not supported)", column.name))
            })?;
            if !existing.column_type.accepts(column.column_type) {
                return Err(mismatch(format!(
                    "column '{}' is {:?} but batch has {:?}",
                    column.name, existing.column_type, column.column_type
                )));
            }
        }

        let mut merged = self.clone();
        if incoming.columns.is_empty() {
            return Ok(merged);
        }
        for spec in &mut merged.columns {
            match incoming.column(&spec.name) {
                Some(col) => {
                    if spec.column_type == ColumnType::Null {
                        spec.column_type = col.column_type;
                    }
                    spec.nullable |= col.nullable;
                }
                None => spec.nullable = true,
            }
        }
        Ok(merged)
    }
}

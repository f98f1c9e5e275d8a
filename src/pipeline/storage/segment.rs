//! Immutable NDJSON segment files.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::schema::{ColumnType, Schema};
use super::{ReadFilter, Row};
use crate::error::{LakehouseError, Result};

pub const DATA_DIR: &str = "data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub min: Value,
    pub max: Value,
}

/// Metadata recorded in the snapshot for one live segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Path relative to the table directory, `/`-separated.
    pub path: String,
    pub rows: usize,
    pub bytes: u64,
    pub sha256: String,
    #[serde(default)]
    pub stats: BTreeMap<String, ColumnStats>,
}

impl SegmentMeta {
    /// False only when the statistics prove no row can match `filter`.
    pub fn may_contain(&self, filter: &ReadFilter) -> bool {
        filter.predicates().all(|(column, expected)| match self.stats.get(column) {
            Some(stats) => {
                compare(expected, &stats.min) != Some(Ordering::Less)
                    && compare(expected, &stats.max) != Some(Ordering::Greater)
            }
            None => true,
        })
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn column_stats(schema: &Schema, rows: &[Row]) -> BTreeMap<String, ColumnStats> {
    let mut stats: BTreeMap<String, ColumnStats> = BTreeMap::new();
    for spec in schema.columns.iter().filter(|c| c.column_type.supports_stats()) {
        for row in rows {
            let Some(value) = row.get(&spec.name) else { continue };
            let comparable = match (spec.column_type, value) {
                (ColumnType::Integer | ColumnType::Float, Value::Number(_)) => true,
                (ColumnType::Text | ColumnType::Date, Value::String(_)) => true,
                _ => false,
            };
            if !comparable {
                continue;
            }
            match stats.get_mut(&spec.name) {
                Some(s) => {
                    if compare(value, &s.min) == Some(Ordering::Less) {
                        s.min = value.clone();
                    }
                    if compare(value, &s.max) == Some(Ordering::Greater) {
                        s.max = value.clone();
                    }
                }
                None => {
                    stats.insert(
                        spec.name.clone(),
                        ColumnStats {
                            min: value.clone(),
                            max: value.clone(),
                        },
                    );
                }
            }
        }
    }
    stats
}

/// Percent-encode a partition path component so any value maps to one safe
/// directory name.
pub fn encode_path_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Relative directory holding a partition's segments.
pub fn partition_dir(partition_column: Option<&str>, partition: &str) -> String {
    match partition_column {
        Some(column) => format!(
            "{}/{}={}",
            DATA_DIR,
            encode_path_component(column),
            encode_path_component(partition)
        ),
        None => DATA_DIR.to_string(),
    }
}

fn to_fs_path(table_dir: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .fold(table_dir.to_path_buf(), |path, part| path.join(part))
}

/// fsync a directory so a rename or link inside it survives a crash.
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)
            .and_then(|f| f.sync_all())
            .map_err(|e| LakehouseError::storage_io(dir, e))?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Serialize, hash and durably write one segment.
pub fn write_segment(
    table_dir: &Path,
    relative_dir: &str,
    version: u64,
    schema: &Schema,
    rows: &[Row],
) -> Result<SegmentMeta> {
    let mut bytes = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut bytes, row)?;
        bytes.push(b'\n');
    }
    let sha256 = hex::encode(Sha256::digest(&bytes));

    let dir = to_fs_path(table_dir, relative_dir);
    fs::create_dir_all(&dir).map_err(|e| LakehouseError::storage_io(&dir, e))?;

    let file_name = format!("part-{:06}-{}.ndjson", version, Uuid::new_v4());
    let final_path = dir.join(&file_name);
    let temp_path = dir.join(format!(".{}.tmp", file_name));

    let mut file = File::create(&temp_path).map_err(|e| LakehouseError::storage_io(&temp_path, e))?;
    file.write_all(&bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| LakehouseError::storage_io(&temp_path, e))?;
    drop(file);
    fs::rename(&temp_path, &final_path).map_err(|e| LakehouseError::storage_io(&final_path, e))?;
    sync_dir(&dir)?;

    Ok(SegmentMeta {
        path: format!("{}/{}", relative_dir, file_name),
        rows: rows.len(),
        bytes: bytes.len() as u64,
        sha256,
        stats: column_stats(schema, rows),
    })
}

/// Read a segment back, verifying its digest.
pub fn read_segment(table: &str, table_dir: &Path, meta: &SegmentMeta) -> Result<Vec<Row>> {
    let path = to_fs_path(table_dir, &meta.path);
    let bytes = fs::read(&path).map_err(|e| LakehouseError::storage_io(&path, e))?;
    let digest = hex::encode(Sha256::digest(&bytes));
    if digest != meta.sha256 {
        return Err(LakehouseError::CorruptTable {
            table: table.to_string(),
            message: format!("checksum mismatch for segment {}", meta.path),
        });
    }

    let mut rows = Vec::with_capacity(meta.rows);
    for line in bytes.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
        rows.push(serde_json::from_slice::<Row>(line)?);
    }
    Ok(rows)
}

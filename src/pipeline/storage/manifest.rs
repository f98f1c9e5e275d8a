//! Version log: one full snapshot file per committed version.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schema::Schema;
use super::segment::{sync_dir, SegmentMeta};
use super::WriteMode;
use crate::error::{LakehouseError, Result};

pub const LOG_DIR: &str = "_log";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub table: String,
    pub version: u64,
    pub committed_at: DateTime<Utc>,
    pub operation: WriteMode,
    pub partition_column: Option<String>,
    pub schema: Schema,
    /// Live segments per partition value (`""` when unpartitioned).
    pub partitions: BTreeMap<String, Vec<SegmentMeta>>,
}

impl Snapshot {
    pub fn total_rows(&self) -> usize {
        self.partitions.values().flatten().map(|s| s.rows).sum()
    }

    pub fn segments(&self) -> impl Iterator<Item = &SegmentMeta> {
        self.partitions.values().flatten()
    }
}

pub fn log_dir(table_dir: &Path) -> PathBuf {
    table_dir.join(LOG_DIR)
}

fn version_file_name(version: u64) -> String {
    format!("{:020}.json", version)
}

fn parse_version(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(".json")?;
    if stem.len() != 20 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// All committed versions, ascending. Temp files are ignored.
pub fn list_versions(table_dir: &Path) -> Result<Vec<u64>> {
    let dir = log_dir(table_dir);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LakehouseError::storage_io(&dir, e)),
    };
    let mut versions = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| LakehouseError::storage_io(&dir, e))?;
        if let Some(v) = entry.file_name().to_str().and_then(parse_version) {
            versions.push(v);
        }
    }
    versions.sort_unstable();
    Ok(versions)
}

pub fn load(table: &str, table_dir: &Path, version: u64) -> Result<Snapshot> {
    let path = log_dir(table_dir).join(version_file_name(version));
    let bytes = fs::read(&path).map_err(|e| LakehouseError::storage_io(&path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| LakehouseError::CorruptTable {
        table: table.to_string(),
        message: format!("unreadable snapshot {}: {}", path.display(), e),
    })
}

pub fn load_latest(table: &str, table_dir: &Path) -> Result<Option<Snapshot>> {
    match list_versions(table_dir)?.last() {
        Some(&version) => load(table, table_dir, version).map(Some),
        None => Ok(None),
    }
}

/// Publish a snapshot. The file is fully written and synced under a temp
/// name, then hard-linked to its version name, which fails if that version
/// already exists.
pub fn commit(table_dir: &Path, snapshot: &Snapshot) -> Result<()> {
    let dir = log_dir(table_dir);
    fs::create_dir_all(&dir).map_err(|e| LakehouseError::storage_io(&dir, e))?;

    let final_path = dir.join(version_file_name(snapshot.version));
    let temp_path = dir.join(format!(".{}.{}.tmp", snapshot.version, Uuid::new_v4()));
    let bytes = serde_json::to_vec_pretty(snapshot)?;

    let mut file = File::create(&temp_path).map_err(|e| LakehouseError::storage_io(&temp_path, e))?;
    file.write_all(&bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| LakehouseError::storage_io(&temp_path, e))?;
    drop(file);

    let linked = fs::hard_link(&temp_path, &final_path);
    let _ = fs::remove_file(&temp_path);
    match linked {
        Ok(()) => sync_dir(&dir),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(LakehouseError::ConcurrentWriteConflict {
            table: snapshot.table.clone(),
            holder: format!("version {} was committed by another writer", snapshot.version),
        }),
        Err(e) => Err(LakehouseError::storage_io(&final_path, e)),
    }
}

/// Remove snapshot files for the given versions.
pub fn remove_versions(table_dir: &Path, versions: &[u64]) -> Result<usize> {
    let dir = log_dir(table_dir);
    let mut removed = 0;
    for version in versions {
        let path = dir.join(version_file_name(*version));
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(LakehouseError::storage_io(&path, e)),
        }
    }
    Ok(removed)
}

/// Remove leftover temp files from interrupted commits.
pub fn remove_temp_files(table_dir: &Path) -> Result<usize> {
    let dir = log_dir(table_dir);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(LakehouseError::storage_io(&dir, e)),
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_str().map_or(false, |n| n.ends_with(".tmp")) {
            fs::remove_file(entry.path()).map_err(|e| LakehouseError::storage_io(entry.path(), e))?;
            removed += 1;
        }
    }
    Ok(removed)
}

//! Durable filesystem table store.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::lock::{LockPolicy, WriterLock};
use super::manifest::{self, Snapshot, FORMAT_VERSION};
use super::plan::{self, UNPARTITIONED};
use super::schema::Schema;
use super::segment::{self, SegmentMeta, DATA_DIR};
use super::{
    partition_value, PartitionInfo, ReadFilter, Row, TableInfo, TableScan, TableStore,
    VacuumReport, WriteMode, WriteOutcome,
};
use crate::error::{LakehouseError, Result};
use crate::observability::metrics;

#[derive(Debug, Clone)]
pub struct FsTableStore {
    root: PathBuf,
    lock_policy: LockPolicy,
    vacuum_grace: Duration,
}

/// How long a superseded snapshot stays readable after its successor commits.
pub const DEFAULT_VACUUM_GRACE: Duration = Duration::from_secs(300);

impl FsTableStore {
    pub fn open(root: impl Into<PathBuf>, lock_policy: LockPolicy) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| LakehouseError::storage_io(&root, e))?;
        Ok(Self {
            root,
            lock_policy,
            vacuum_grace: DEFAULT_VACUUM_GRACE,
        })
    }

    pub fn with_vacuum_grace(mut self, grace: Duration) -> Self {
        self.vacuum_grace = grace;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, table: &str) -> Result<PathBuf> {
        let valid = !table.is_empty()
            && !table.starts_with('.')
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
        if !valid {
            return Err(LakehouseError::Config(format!("invalid table name '{}'", table)));
        }
        Ok(self.root.join(table))
    }

    fn write_blocking(
        &self,
        table: &str,
        rows: Vec<Row>,
        mode: WriteMode,
        partition_key: Option<&str>,
    ) -> Result<WriteOutcome> {
        let started = Instant::now();
        let dir = self.table_dir(table)?;
        let _lock = WriterLock::acquire(table, &dir, &self.lock_policy)?;

        // Re-read under the lock so a writer that waited sees the latest state
        let prior = manifest::load_latest(table, &dir)?;
        let partition_column = plan::resolve_partition_column(
            table,
            prior.as_ref().map(|s| s.partition_column.as_deref()),
            partition_key,
            mode,
        )?;

        let incoming_schema = Schema::infer(table, &rows)?;
        let schema = match (&prior, mode) {
            (Some(p), WriteMode::Append | WriteMode::DynamicOverwrite) => {
                p.schema.merge(table, &incoming_schema)?
            }
            _ => incoming_schema,
        };

        let rows_written = rows.len();
        let groups = plan::group_rows(table, rows, partition_column.as_deref())?;
        let version = prior.as_ref().map_or(0, |p| p.version + 1);

        let mut incoming: BTreeMap<String, SegmentMeta> = BTreeMap::new();
        for (key, group) in &groups {
            let relative = segment::partition_dir(partition_column.as_deref(), key);
            let meta = segment::write_segment(&dir, &relative, version, &schema, group)?;
            incoming.insert(key.clone(), meta);
        }
        let segments_written = incoming.len();
        let partitions_written: Vec<String> = incoming
            .keys()
            .filter(|k| k.as_str() != UNPARTITIONED)
            .cloned()
            .collect();

        let empty = BTreeMap::new();
        let prior_partitions = prior.as_ref().map_or(&empty, |p| &p.partitions);
        let partitions = plan::apply_mode(prior_partitions, incoming, mode);

        let snapshot = Snapshot {
            format_version: FORMAT_VERSION,
            table: table.to_string(),
            version,
            committed_at: Utc::now(),
            operation: mode,
            partition_column,
            schema,
            partitions,
        };
        manifest::commit(&dir, &snapshot)?;

        metrics::storage::write_committed(
            table,
            mode.as_str(),
            rows_written,
            started.elapsed().as_secs_f64(),
        );
        info!(
            "Committed {} v{} ({}): {} rows in {} segments",
            table, version, mode, rows_written, segments_written
        );

        Ok(WriteOutcome {
            table: table.to_string(),
            version,
            mode,
            rows_written,
            partitions_written,
            segments_written,
        })
    }

    fn read_blocking(&self, table: &str, filter: &ReadFilter) -> Result<TableScan> {
        let dir = self.table_dir(table)?;
        let snapshot = manifest::load_latest(table, &dir)?
            .ok_or_else(|| LakehouseError::TableNotFound(table.to_string()))?;

        let partition_target = snapshot
            .partition_column
            .as_deref()
            .and_then(|col| filter.get(col).map(|v| (col, partition_value(v))));

        let mut rows = Vec::new();
        let mut partitions_pruned = 0;
        let mut segments_pruned = 0;
        for (key, segments) in &snapshot.partitions {
            if let Some((_, target)) = &partition_target {
                if target.as_deref() != Some(key.as_str()) {
                    partitions_pruned += 1;
                    continue;
                }
            }
            for meta in segments {
                if !meta.may_contain(filter) {
                    segments_pruned += 1;
                    continue;
                }
                for row in segment::read_segment(table, &dir, meta)? {
                    check_partition_value(table, &snapshot, key, &row)?;
                    if filter.matches(&row) {
                        rows.push(row);
                    }
                }
            }
        }

        metrics::storage::read(table, rows.len(), partitions_pruned, segments_pruned);
        debug!(
            "Read {} v{}: {} rows ({} partitions pruned, {} segments pruned)",
            table,
            snapshot.version,
            rows.len(),
            partitions_pruned,
            segments_pruned
        );
        Ok(TableScan {
            version: snapshot.version,
            rows,
            partitions_pruned,
            segments_pruned,
        })
    }

    fn describe_blocking(&self, table: &str) -> Result<Option<TableInfo>> {
        let dir = self.table_dir(table)?;
        Ok(manifest::load_latest(table, &dir)?.map(|s| table_info(&s)))
    }

    fn vacuum_blocking(&self, table: &str, retain_versions: usize) -> Result<VacuumReport> {
        let dir = self.table_dir(table)?;
        if !dir.join(manifest::LOG_DIR).exists() {
            return Err(LakehouseError::TableNotFound(table.to_string()));
        }
        let _lock = WriterLock::acquire(table, &dir, &self.lock_policy)?;

        let versions = manifest::list_versions(&dir)?;
        let keep = retain_versions.max(1).min(versions.len());
        let mut split = versions.len() - keep;
        // A reader may still hold version v until v+1 is older than the grace period
        while split > 0 {
            let successor = manifest::load(table, &dir, versions[split])?;
            let age = Utc::now()
                .signed_duration_since(successor.committed_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if age >= self.vacuum_grace {
                break;
            }
            split -= 1;
        }
        if split < versions.len() - keep {
            debug!(
                "Keeping {} superseded version(s) of {} inside the {}s grace period",
                versions.len() - keep - split,
                table,
                self.vacuum_grace.as_secs()
            );
        }
        let (expired, retained) = versions.split_at(split);

        let mut referenced: HashSet<String> = HashSet::new();
        for version in retained {
            let snapshot = manifest::load(table, &dir, *version)?;
            referenced.extend(snapshot.segments().map(|s| s.path.clone()));
        }

        let versions_removed = manifest::remove_versions(&dir, expired)?;
        let mut report = VacuumReport {
            table: table.to_string(),
            versions_removed,
            files_removed: manifest::remove_temp_files(&dir)?,
            bytes_freed: 0,
        };
        sweep_data_dir(&dir.join(DATA_DIR), DATA_DIR, &referenced, &mut report)?;

        info!(
            "Vacuumed {}: {} versions, {} files, {} bytes",
            table, report.versions_removed, report.files_removed, report.bytes_freed
        );
        Ok(report)
    }

    fn list_tables_blocking(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| LakehouseError::storage_io(&self.root, e))?;
        let mut tables = Vec::new();
        for entry in entries.flatten() {
            let has_log = entry.path().join(manifest::LOG_DIR).is_dir();
            if let (true, Some(name)) = (has_log, entry.file_name().to_str()) {
                tables.push(name.to_string());
            }
        }
        tables.sort();
        Ok(tables)
    }
}

fn check_partition_value(table: &str, snapshot: &Snapshot, key: &str, row: &Row) -> Result<()> {
    let Some(column) = snapshot.partition_column.as_deref() else {
        return Ok(());
    };
    let actual = row.get(column).and_then(partition_value);
    if actual.as_deref() != Some(key) {
        return Err(LakehouseError::CorruptTable {
            table: table.to_string(),
            message: format!(
                "row in partition {}={} carries {:?}",
                column, key, actual
            ),
        });
    }
    Ok(())
}

pub(crate) fn table_info(snapshot: &Snapshot) -> TableInfo {
    TableInfo {
        table: snapshot.table.clone(),
        version: snapshot.version,
        committed_at: snapshot.committed_at,
        partition_column: snapshot.partition_column.clone(),
        schema: snapshot.schema.clone(),
        total_rows: snapshot.total_rows(),
        partitions: snapshot
            .partitions
            .iter()
            .map(|(value, segments)| PartitionInfo {
                value: value.clone(),
                rows: segments.iter().map(|s| s.rows).sum(),
                segments: segments.len(),
            })
            .collect(),
    }
}

/// Delete every file under `dir` not referenced by a retained snapshot, then
/// remove partition directories left empty.
fn sweep_data_dir(
    dir: &Path,
    relative: &str,
    referenced: &HashSet<String>,
    report: &mut VacuumReport,
) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(LakehouseError::storage_io(dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| LakehouseError::storage_io(dir, e))?;
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!("Skipping non UTF-8 path {}", path.display());
            continue;
        };
        let child = format!("{}/{}", relative, name);
        let file_type = entry.file_type().map_err(|e| LakehouseError::storage_io(&path, e))?;
        if file_type.is_dir() {
            sweep_data_dir(&path, &child, referenced, report)?;
            if fs::read_dir(&path).map(|mut d| d.next().is_none()).unwrap_or(false) {
                let _ = fs::remove_dir(&path);
            }
        } else if !referenced.contains(&child) {
            let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            fs::remove_file(&path).map_err(|e| LakehouseError::storage_io(&path, e))?;
            report.files_removed += 1;
            report.bytes_freed += bytes;
        }
    }
    Ok(())
}

#[async_trait]
impl TableStore for FsTableStore {
    async fn write(
        &self,
        table: &str,
        rows: Vec<Row>,
        mode: WriteMode,
        partition_key: Option<&str>,
    ) -> Result<WriteOutcome> {
        let store = self.clone();
        let table = table.to_string();
        let partition_key = partition_key.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            store.write_blocking(&table, rows, mode, partition_key.as_deref())
        })
        .await?
    }

    async fn read(&self, table: &str, filter: &ReadFilter) -> Result<TableScan> {
        let store = self.clone();
        let table = table.to_string();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || store.read_blocking(&table, &filter)).await?
    }

    async fn describe(&self, table: &str) -> Result<Option<TableInfo>> {
        let store = self.clone();
        let table = table.to_string();
        tokio::task::spawn_blocking(move || store.describe_blocking(&table)).await?
    }

    async fn vacuum(&self, table: &str, retain_versions: usize) -> Result<VacuumReport> {
        let store = self.clone();
        let table = table.to_string();
        tokio::task::spawn_blocking(move || store.vacuum_blocking(&table, retain_versions)).await?
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.list_tables_blocking()).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tempfile::tempdir;

    fn rows(values: Value) -> Vec<Row> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn store(root: &Path) -> FsTableStore {
        FsTableStore::open(
            root,
            LockPolicy {
                timeout: Duration::from_secs(5),
                retry_interval: Duration::from_millis(5),
                stale_after: Duration::from_secs(600),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_read_missing_table_is_not_found() {
        let dir = tempdir().unwrap();
        let err = store(dir.path()).read("nope", &ReadFilter::all()).await.unwrap_err();
        assert!(matches!(err, LakehouseError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_partition_paths_are_encoded() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store
            .write(
                "registry",
                rows(json!([{"province": "NEGROS OCCIDENTAL", "n": 1}])),
                WriteMode::Overwrite,
                Some("province"),
            )
            .await
            .unwrap();
        assert!(dir
            .path()
            .join("registry/data/province=NEGROS%20OCCIDENTAL")
            .is_dir());
        let scan = store
            .read("registry", &ReadFilter::all().eq("province", "NEGROS OCCIDENTAL"))
            .await
            .unwrap();
        assert_eq!(scan.rows.len(), 1);
    }

    #[tokio::test]
    async fn test_partition_filter_prunes_other_partitions() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store
            .write(
                "r",
                rows(json!([
                    {"province": "AKLAN", "n": 1},
                    {"province": "CAPIZ", "n": 2},
                    {"province": "ILOILO", "n": 3}
                ])),
                WriteMode::Overwrite,
                Some("province"),
            )
            .await
            .unwrap();
        let scan = store
            .read("r", &ReadFilter::all().eq("province", "CAPIZ"))
            .await
            .unwrap();
        assert_eq!(scan.rows.len(), 1);
        assert_eq!(scan.partitions_pruned, 2);
    }

    #[tokio::test]
    async fn test_schema_mismatch_leaves_table_untouched() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store
            .write("t", rows(json!([{"a": 1}])), WriteMode::Append, None)
            .await
            .unwrap();
        let err = store
            .write("t", rows(json!([{"a": "x"}])), WriteMode::Append, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LakehouseError::SchemaMismatch { .. }));
        let info = store.describe("t").await.unwrap().unwrap();
        assert_eq!(info.version, 0);
        assert_eq!(info.total_rows, 1);
    }

    #[tokio::test]
    async fn test_tampered_partition_value_is_corruption() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store
            .write(
                "r",
                rows(json!([{"province": "AKLAN", "n": 1}])),
                WriteMode::Overwrite,
                Some("province"),
            )
            .await
            .unwrap();
        // Rewrite the snapshot so the AKLAN segment is listed under CAPIZ
        let table_dir = dir.path().join("r");
        let mut snapshot = manifest::load_latest("r", &table_dir).unwrap().unwrap();
        let segments = snapshot.partitions.remove("AKLAN").unwrap();
        snapshot.partitions.insert("CAPIZ".to_string(), segments);
        snapshot.version += 1;
        manifest::commit(&table_dir, &snapshot).unwrap();

        let err = store.read("r", &ReadFilter::all()).await.unwrap_err();
        assert!(matches!(err, LakehouseError::CorruptTable { .. }));
    }

    #[tokio::test]
    async fn test_vacuum_removes_unreferenced_segments() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        for n in 0..3 {
            store
                .write("t", rows(json!([{"n": n}])), WriteMode::Overwrite, None)
                .await
                .unwrap();
        }
        fs::write(dir.path().join("t/data/.orphan.tmp"), b"x").unwrap();

        let report = store
            .clone()
            .with_vacuum_grace(Duration::ZERO)
            .vacuum("t", 1)
            .await
            .unwrap();
        assert_eq!(report.versions_removed, 2);
        assert_eq!(report.files_removed, 3);

        let scan = store.read("t", &ReadFilter::all()).await.unwrap();
        assert_eq!(scan.version, 2);
        assert_eq!(scan.rows[0]["n"], json!(2));
        assert_eq!(store.list_tables().await.unwrap(), vec!["t".to_string()]);
    }

    #[tokio::test]
    async fn test_vacuum_keeps_recently_superseded_versions() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        for n in 0..3 {
            store
                .write("t", rows(json!([{"n": n}])), WriteMode::Overwrite, None)
                .await
                .unwrap();
        }
        fs::write(dir.path().join("t/data/.orphan.tmp"), b"x").unwrap();

        let report = store.vacuum("t", 1).await.unwrap();
        assert_eq!(report.versions_removed, 0);
        assert_eq!(report.files_removed, 1);
        assert_eq!(
            manifest::list_versions(&dir.path().join("t")).unwrap().len(),
            3
        );
        // A reader pinned to the oldest snapshot can still load its segments
        let oldest = manifest::load("t", &dir.path().join("t"), 0).unwrap();
        for segment in oldest.segments() {
            assert!(dir.path().join("t").join(&segment.path).exists());
        }
    }

    #[tokio::test]
    async fn test_invalid_table_name_rejected() {
        let dir = tempdir().unwrap();
        let err = store(dir.path())
            .write("../escape", Vec::new(), WriteMode::Append, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LakehouseError::Config(_)));
    }
}

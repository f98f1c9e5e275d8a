use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::manifest::{Snapshot, FORMAT_VERSION};
use super::plan::{self, UNPARTITIONED};
use super::schema::Schema;
use super::{
    fs::table_info, partition_value, ReadFilter, Row, TableInfo, TableScan, TableStore,
    VacuumReport, WriteMode, WriteOutcome,
};
use crate::error::{LakehouseError, Result};

/// One in-memory segment; shared between versions instead of copied.
type MemSegment = Arc<Vec<Row>>;

struct MemTable {
    snapshot: Snapshot,
    segments: BTreeMap<String, Vec<MemSegment>>,
}

/// In-memory table store for development/testing.
///
/// Writers hold the map's write lock for the whole commit, so writes to any
/// table are serialized and readers always see a complete version.
#[derive(Clone, Default)]
pub struct InMemoryTableStore {
    tables: Arc<RwLock<HashMap<String, MemTable>>>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(table: &str) -> LakehouseError {
    LakehouseError::CorruptTable {
        table: table.to_string(),
        message: "in-memory store lock poisoned".to_string(),
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn write(
        &self,
        table: &str,
        rows: Vec<Row>,
        mode: WriteMode,
        partition_key: Option<&str>,
    ) -> Result<WriteOutcome> {
        let mut tables = self.tables.write().map_err(|_| poisoned(table))?;
        let prior = tables.get(table);

        let partition_column = plan::resolve_partition_column(
            table,
            prior.map(|t| t.snapshot.partition_column.as_deref()),
            partition_key,
            mode,
        )?;
        let incoming_schema = Schema::infer(table, &rows)?;
        let schema = match (prior, mode) {
            (Some(t), WriteMode::Append | WriteMode::DynamicOverwrite) => {
                t.snapshot.schema.merge(table, &incoming_schema)?
            }
            _ => incoming_schema,
        };

        let rows_written = rows.len();
        let groups = plan::group_rows(table, rows, partition_column.as_deref())?;
        let partitions_written: Vec<String> = groups
            .keys()
            .filter(|k| k.as_str() != UNPARTITIONED)
            .cloned()
            .collect();
        let segments_written = groups.len();
        let incoming: BTreeMap<String, MemSegment> =
            groups.into_iter().map(|(k, rows)| (k, Arc::new(rows))).collect();

        let empty = BTreeMap::new();
        let prior_segments = prior.map_or(&empty, |t| &t.segments);
        let segments = plan::apply_mode(prior_segments, incoming, mode);
        let version = prior.map_or(0, |t| t.snapshot.version + 1);

        // Snapshot metadata mirrors the filesystem layout so describe() agrees
        let partitions = segments
            .iter()
            .map(|(key, segs)| {
                let metas = segs
                    .iter()
                    .map(|s| super::segment::SegmentMeta {
                        path: format!("memory/{}", key),
                        rows: s.len(),
                        bytes: 0,
                        sha256: String::new(),
                        stats: BTreeMap::new(),
                    })
                    .collect();
                (key.clone(), metas)
            })
            .collect();

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
        tables.insert(table.to_string(), MemTable { snapshot, segments });

        debug!("Committed {} v{} ({}) in memory: {} rows", table, version, mode, rows_written);
        Ok(WriteOutcome {
            table: table.to_string(),
            version,
            mode,
            rows_written,
            partitions_written,
            segments_written,
        })
    }

    async fn read(&self, table: &str, filter: &ReadFilter) -> Result<TableScan> {
        let (version, partition_column, segments) = {
            let tables = self.tables.read().map_err(|_| poisoned(table))?;
            let t = tables
                .get(table)
                .ok_or_else(|| LakehouseError::TableNotFound(table.to_string()))?;
            (
                t.snapshot.version,
                t.snapshot.partition_column.clone(),
                t.segments.clone(),
            )
        };

        let target = partition_column
            .as_deref()
            .and_then(|col| filter.get(col))
            .map(partition_value);

        let mut rows = Vec::new();
        let mut partitions_pruned = 0;
        for (key, segs) in &segments {
            if let Some(target) = &target {
                if target.as_deref() != Some(key.as_str()) {
                    partitions_pruned += 1;
                    continue;
                }
            }
            rows.extend(
                segs.iter()
                    .flat_map(|s| s.iter())
                    .filter(|r| filter.matches(r))
                    .cloned(),
            );
        }
        Ok(TableScan {
            version,
            rows,
            partitions_pruned,
            segments_pruned: 0,
        })
    }

    async fn describe(&self, table: &str) -> Result<Option<TableInfo>> {
        let tables = self.tables.read().map_err(|_| poisoned(table))?;
        Ok(tables.get(table).map(|t| table_info(&t.snapshot)))
    }

    async fn vacuum(&self, table: &str, _retain_versions: usize) -> Result<VacuumReport> {
        // Old versions are never retained in memory
        let tables = self.tables.read().map_err(|_| poisoned(table))?;
        if !tables.contains_key(table) {
            return Err(LakehouseError::TableNotFound(table.to_string()));
        }
        Ok(VacuumReport {
            table: table.to_string(),
            ..VacuumReport::default()
        })
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = self.tables.read().map_err(|_| poisoned("*"))?;
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

//! Metrics for the lakehouse.
//!
//! Every metric name lives in [`MetricName`] so call sites never carry magic
//! strings. Recording goes through the `metrics` facade; when no recorder is
//! installed (tests, batch tools) the calls are no-ops.

use std::fmt;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Storage
    StorageWritesCommitted,
    StorageRowsWritten,
    StorageWriteConflicts,
    StorageWriteDuration,
    StorageReads,
    StorageRowsRead,
    StoragePartitionsPruned,
    StorageSegmentsPruned,

    // Normalization
    NormalizeRowsClean,
    NormalizeRowsQuarantined,
    NormalizeRowsSkipped,

    // Ingestion
    IngestFilesProcessed,
    IngestFilesFailed,

    // Query service
    QueryRequests,
    QueryErrors,
    QueryDuration,
    QueryGroupsReturned,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::StorageWritesCommitted => "lakehouse_storage_writes_committed_total",
            MetricName::StorageRowsWritten => "lakehouse_storage_rows_written_total",
            MetricName::StorageWriteConflicts => "lakehouse_storage_write_conflicts_total",
            MetricName::StorageWriteDuration => "lakehouse_storage_write_duration_seconds",
            MetricName::StorageReads => "lakehouse_storage_reads_total",
            MetricName::StorageRowsRead => "lakehouse_storage_rows_read_total",
            MetricName::StoragePartitionsPruned => "lakehouse_storage_partitions_pruned_total",
            MetricName::StorageSegmentsPruned => "lakehouse_storage_segments_pruned_total",

            MetricName::NormalizeRowsClean => "lakehouse_normalize_rows_clean_total",
            MetricName::NormalizeRowsQuarantined => "lakehouse_normalize_rows_quarantined_total",
            MetricName::NormalizeRowsSkipped => "lakehouse_normalize_rows_skipped_total",

            MetricName::IngestFilesProcessed => "lakehouse_ingest_files_processed_total",
            MetricName::IngestFilesFailed => "lakehouse_ingest_files_failed_total",

            MetricName::QueryRequests => "lakehouse_query_requests_total",
            MetricName::QueryErrors => "lakehouse_query_errors_total",
            MetricName::QueryDuration => "lakehouse_query_duration_seconds",
            MetricName::QueryGroupsReturned => "lakehouse_query_groups_returned",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            StorageWritesCommitted,
            StorageRowsWritten,
            StorageWriteConflicts,
            StorageWriteDuration,
            StorageReads,
            StorageRowsRead,
            StoragePartitionsPruned,
            StorageSegmentsPruned,
            NormalizeRowsClean,
            NormalizeRowsQuarantined,
            NormalizeRowsSkipped,
            IngestFilesProcessed,
            IngestFilesFailed,
            QueryRequests,
            QueryErrors,
            QueryDuration,
            QueryGroupsReturned,
        ]
        .into_iter()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once.
pub fn init() -> Option<PrometheusHandle> {
    if let Some(handle) = HANDLE.get() {
        return Some(handle.clone());
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus recorder installed");
            let _ = HANDLE.set(handle.clone());
            Some(handle)
        }
        Err(e) => {
            warn!("Prometheus recorder install failed (possibly already installed): {}", e);
            None
        }
    }
}

pub mod storage {
    use super::MetricName;

    pub fn write_committed(table: &str, mode: &str, rows: usize, seconds: f64) {
        metrics::counter!(
            MetricName::StorageWritesCommitted.as_str(),
            "table" => table.to_string(),
            "mode" => mode.to_string()
        )
        .increment(1);
        metrics::counter!(MetricName::StorageRowsWritten.as_str(), "table" => table.to_string())
            .increment(rows as u64);
        metrics::histogram!(MetricName::StorageWriteDuration.as_str(), "table" => table.to_string())
            .record(seconds);
    }

    pub fn write_conflict(table: &str) {
        metrics::counter!(MetricName::StorageWriteConflicts.as_str(), "table" => table.to_string())
            .increment(1);
    }

    pub fn read(table: &str, rows: usize, partitions_pruned: usize, segments_pruned: usize) {
        metrics::counter!(MetricName::StorageReads.as_str(), "table" => table.to_string())
            .increment(1);
        metrics::counter!(MetricName::StorageRowsRead.as_str(), "table" => table.to_string())
            .increment(rows as u64);
        metrics::counter!(MetricName::StoragePartitionsPruned.as_str(), "table" => table.to_string())
            .increment(partitions_pruned as u64);
        metrics::counter!(MetricName::StorageSegmentsPruned.as_str(), "table" => table.to_string())
            .increment(segments_pruned as u64);
    }
}

pub mod normalize {
    use super::MetricName;

    pub fn batch(kind: &str, clean: usize, quarantined: usize, skipped: usize) {
        metrics::counter!(MetricName::NormalizeRowsClean.as_str(), "kind" => kind.to_string())
            .increment(clean as u64);
        metrics::counter!(MetricName::NormalizeRowsQuarantined.as_str(), "kind" => kind.to_string())
            .increment(quarantined as u64);
        metrics::counter!(MetricName::NormalizeRowsSkipped.as_str(), "kind" => kind.to_string())
            .increment(skipped as u64);
    }
}

pub mod ingest {
    use super::MetricName;

    pub fn file_processed(kind: &str) {
        metrics::counter!(MetricName::IngestFilesProcessed.as_str(), "kind" => kind.to_string())
            .increment(1);
    }

    pub fn file_failed(kind: &str) {
        metrics::counter!(MetricName::IngestFilesFailed.as_str(), "kind" => kind.to_string())
            .increment(1);
    }
}

pub mod query {
    use super::MetricName;

    pub fn request(status: u16, seconds: f64, groups: usize) {
        metrics::counter!(MetricName::QueryRequests.as_str(), "status" => status.to_string())
            .increment(1);
        metrics::histogram!(MetricName::QueryDuration.as_str()).record(seconds);
        if status >= 400 {
            metrics::counter!(MetricName::QueryErrors.as_str(), "status" => status.to_string())
                .increment(1);
        } else {
            metrics::histogram!(MetricName::QueryGroupsReturned.as_str()).record(groups as f64);
        }
    }
}

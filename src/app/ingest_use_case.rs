use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::app::ports::{ArchivePort, BatchSourcePort};
use crate::config::{TablePolicy, TablesConfig};
use crate::domain::{to_row, SourceKind};
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::processing::normalize;
use crate::pipeline::storage::{Row, TableStore, WriteMode};

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileFailure {
    pub file: String,
    pub error: String,
}

/// Summary of one ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub kind: SourceKind,
    pub mode: WriteMode,
    pub files_processed: Vec<String>,
    pub files_failed: Vec<FileFailure>,
    pub rows_written: usize,
    pub rows_quarantined: usize,
    pub rows_skipped: usize,
    /// Version of the target table after the run, if it was written
    pub table_version: Option<u64>,
    pub quarantine_version: Option<u64>,
}

impl IngestReport {
    fn new(kind: SourceKind, mode: WriteMode) -> Self {
        Self {
            kind,
            mode,
            files_processed: Vec::new(),
            files_failed: Vec::new(),
            rows_written: 0,
            rows_quarantined: 0,
            rows_skipped: 0,
            table_version: None,
            quarantine_version: None,
        }
    }
}

/// Use case for ingesting one source kind: read every pending file,
/// normalize, write clean rows and quarantined rows, then archive.
///
/// All files of a run go into a single write per table, so an overwrite
/// replaces the table with the whole run at once. Files are archived only
/// after their rows are durable; a file that fails to read or normalize is
/// left in place for review.
pub struct IngestUseCase {
    source: Arc<dyn BatchSourcePort>,
    archiver: Arc<dyn ArchivePort>,
    store: Arc<dyn TableStore>,
    tables: TablesConfig,
}

impl IngestUseCase {
    pub fn new(
        source: Arc<dyn BatchSourcePort>,
        archiver: Arc<dyn ArchivePort>,
        store: Arc<dyn TableStore>,
        tables: TablesConfig,
    ) -> Self {
        Self {
            source,
            archiver,
            store,
            tables,
        }
    }

    fn target_policy(&self, kind: SourceKind) -> &TablePolicy {
        match kind {
            SourceKind::Incident => &self.tables.incidents,
            SourceKind::Registry => &self.tables.registry,
            SourceKind::ErrorFile => &self.tables.quarantine,
        }
    }

    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn run(&self, kind: SourceKind, mode: Option<WriteMode>) -> Result<IngestReport> {
        let policy = self.target_policy(kind);
        let mode = policy.resolve_mode(mode)?;
        let mut report = IngestReport::new(kind, mode);

        let files = self.source.list(kind).await?;
        if files.is_empty() {
            info!("No {} files to ingest", kind);
            return Ok(report);
        }
        info!("Found {} {} file(s), mode {}", files.len(), kind, mode);

        let mut clean_rows: Vec<Row> = Vec::new();
        let mut quarantine_rows: Vec<Row> = Vec::new();
        let mut succeeded: Vec<PathBuf> = Vec::new();

        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let normalized = match self.source.read(&path, kind).await {
                Ok(batch) => normalize::normalize(&batch),
                Err(e) => Err(e),
            };
            match normalized {
                Ok(batch) => {
                    info!(
                        "{}: {} clean, {} quarantined, {} skipped",
                        name,
                        batch.clean.len(),
                        batch.quarantined.len(),
                        batch.skipped
                    );
                    report.rows_skipped += batch.skipped;
                    for record in &batch.quarantined {
                        quarantine_rows.push(to_row(record)?);
                    }
                    clean_rows.extend(batch.clean);
                    succeeded.push(path);
                }
                Err(e) => {
                    warn!("{} failed and was not moved: {}", name, e);
                    metrics::ingest::file_failed(kind.as_str());
                    report.files_failed.push(FileFailure {
                        file: name,
                        error: e.to_string(),
                    });
                }
            }
        }

        if succeeded.is_empty() {
            return Ok(report);
        }

        // Quarantine first. If the target write fails, no file is archived and
        // a rerun rewrites the same quarantine image.
        report.rows_quarantined = quarantine_rows.len();
        let quarantine = &self.tables.quarantine;
        let quarantine_mode = if kind == SourceKind::ErrorFile {
            mode
        } else {
            quarantine.default_mode
        };
        let outcome = self
            .store
            .write(
                &quarantine.name,
                quarantine_rows,
                quarantine_mode,
                quarantine.partition_column.as_deref(),
            )
            .await?;
        report.quarantine_version = Some(outcome.version);

        if kind != SourceKind::ErrorFile && !clean_rows.is_empty() {
            let rows = clean_rows.len();
            let outcome = self
                .store
                .write(&policy.name, clean_rows, mode, policy.partition_column.as_deref())
                .await
                .map_err(|e| {
                    error!(
                        "{} write failed after quarantine v{} was committed; {} file(s) left in place: {}",
                        policy.name,
                        report.quarantine_version.unwrap_or_default(),
                        succeeded.len(),
                        e
                    );
                    e
                })?;
            report.rows_written = rows;
            report.table_version = Some(outcome.version);
        }

        for path in succeeded {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match self.archiver.archive(&path).await {
                Ok(_) => {
                    metrics::ingest::file_processed(kind.as_str());
                    report.files_processed.push(name);
                }
                Err(e) => {
                    warn!("{} was ingested but could not be archived: {}", name, e);
                    report.files_failed.push(FileFailure {
                        file: name,
                        error: format!("archive failed: {}", e),
                    });
                }
            }
        }

        info!(
            "Ingested {} file(s): {} rows written, {} quarantined, {} failed",
            report.files_processed.len(),
            report.rows_written,
            report.rows_quarantined,
            report.files_failed.len()
        );
        Ok(report)
    }
}

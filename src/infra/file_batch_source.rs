use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::app::ports::BatchSourcePort;
use crate::config::IngestConfig;
use crate::domain::SourceKind;
use crate::error::Result;
use crate::pipeline::ingestion::{list_batch_files, read_batch, RawBatch};
use crate::pipeline::processing::normalize::is_registry_file;

/// Reads batches from the configured input directories on local disk.
#[derive(Debug, Clone)]
pub struct FileBatchSource {
    incident_dir: PathBuf,
    registry_dir: PathBuf,
    error_file: PathBuf,
}

impl FileBatchSource {
    pub fn new(incident_dir: PathBuf, registry_dir: PathBuf, error_file: PathBuf) -> Self {
        Self {
            incident_dir,
            registry_dir,
            error_file,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            config.raw_data_dir.clone(),
            config.registry_input_dir.clone(),
            config.error_input_file.clone(),
        )
    }
}

#[async_trait]
impl BatchSourcePort for FileBatchSource {
    async fn list(&self, kind: SourceKind) -> Result<Vec<PathBuf>> {
        match kind {
            SourceKind::Incident => {
                let dir = self.incident_dir.clone();
                tokio::task::spawn_blocking(move || list_batch_files(&dir, |_| true)).await?
            }
            SourceKind::Registry => {
                let dir = self.registry_dir.clone();
                tokio::task::spawn_blocking(move || list_batch_files(&dir, is_registry_file)).await?
            }
            SourceKind::ErrorFile => Ok(if self.error_file.is_file() {
                vec![self.error_file.clone()]
            } else {
                Vec::new()
            }),
        }
    }

    async fn read(&self, path: &Path, kind: SourceKind) -> Result<RawBatch> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || read_batch(&path, kind)).await?
    }
}

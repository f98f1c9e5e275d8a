use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::app::ports::ArchivePort;
use crate::error::Result;
use crate::pipeline::ingestion::archive_file;

/// Moves ingested files into a `processed/` directory next to them.
#[derive(Debug, Clone, Default)]
pub struct FsArchiver;

#[async_trait]
impl ArchivePort for FsArchiver {
    async fn archive(&self, path: &Path) -> Result<PathBuf> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || archive_file(&path)).await?
    }
}

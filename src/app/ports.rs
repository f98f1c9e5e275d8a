use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::SourceKind;
use crate::error::Result;
use crate::pipeline::ingestion::RawBatch;

// Ingest-side ports
#[async_trait]
pub trait BatchSourcePort: Send + Sync {
    /// Input files waiting to be ingested for a source kind, in processing order.
    async fn list(&self, kind: SourceKind) -> Result<Vec<PathBuf>>;
    async fn read(&self, path: &Path, kind: SourceKind) -> Result<RawBatch>;
}

#[async_trait]
pub trait ArchivePort: Send + Sync {
    /// Move a successfully ingested file out of the input location.
    async fn archive(&self, path: &Path) -> Result<PathBuf>;
}

// Export-side ports
#[async_trait]
pub trait ExportSinkPort: Send + Sync {
    /// Atomically publish the export document, returning where it landed.
    async fn publish(&self, bytes: Vec<u8>) -> Result<PathBuf>;
}

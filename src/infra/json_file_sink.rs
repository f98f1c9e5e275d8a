use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::app::ports::ExportSinkPort;
use crate::error::{LakehouseError, Result};

/// Publishes the export document to a single file. Readers see either the
/// previous document or the new one, never a partial write.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn publish_blocking(path: PathBuf, bytes: Vec<u8>) -> Result<PathBuf> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LakehouseError::storage_io(parent, e))?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| LakehouseError::Config(format!("export path {} has no file name", path.display())))?;
        let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(LakehouseError::storage_io(&path, e));
        }
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }
}

#[async_trait]
impl ExportSinkPort for JsonFileSink {
    async fn publish(&self, bytes: Vec<u8>) -> Result<PathBuf> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::publish_blocking(path, bytes)).await?
    }
}

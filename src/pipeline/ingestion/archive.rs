use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::constants::PROCESSED_DIR_NAME;
use crate::error::{LakehouseError, Result};

/// Move a processed input file into `<its dir>/processed/`, replacing any
/// earlier file of the same name there.
pub fn archive_file(path: &Path) -> Result<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let processed_dir = parent.join(PROCESSED_DIR_NAME);
    fs::create_dir_all(&processed_dir).map_err(|e| LakehouseError::storage_io(&processed_dir, e))?;

    let file_name = path.file_name().ok_or_else(|| LakehouseError::SourceFormat {
        path: path.display().to_string(),
        message: "path has no file name".to_string(),
    })?;
    let target = processed_dir.join(file_name);
    if target.exists() {
        fs::remove_file(&target).map_err(|e| LakehouseError::storage_io(&target, e))?;
    }

    if fs::rename(path, &target).is_err() {
        // Rename fails across filesystems; fall back to copy + remove
        fs::copy(path, &target).map_err(|e| LakehouseError::storage_io(&target, e))?;
        fs::remove_file(path).map_err(|e| LakehouseError::storage_io(path, e))?;
    }
    info!("Moved processed file to {}", target.display());
    Ok(target)
}

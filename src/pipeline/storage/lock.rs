//! Per-table writer lock backed by an exclusively created lock file.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{LakehouseError, Result};

pub const LOCK_FILE: &str = "_write.lock";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockPolicy {
    /// How long to wait for another writer; zero fails immediately.
    pub timeout: Duration,
    pub retry_interval: Duration,
    /// Locks older than this are considered abandoned.
    pub stale_after: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(50),
            stale_after: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    owner: Uuid,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held writer lock; released on drop.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
    owner: Uuid,
}

impl WriterLock {
    pub fn acquire(table: &str, table_dir: &Path, policy: &LockPolicy) -> Result<WriterLock> {
        fs::create_dir_all(table_dir).map_err(|e| LakehouseError::storage_io(table_dir, e))?;
        let path = table_dir.join(LOCK_FILE);
        let owner = Uuid::new_v4();
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let info = LockInfo {
                        owner,
                        pid: std::process::id(),
                        acquired_at: Utc::now(),
                    };
                    let body = serde_json::to_vec(&info)?;
                    file.write_all(&body)
                        .and_then(|_| file.sync_all())
                        .map_err(|e| LakehouseError::storage_io(&path, e))?;
                    debug!("Acquired writer lock on {}", table);
                    return Ok(WriterLock { path, owner });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&path, policy.stale_after) {
                        warn!(
                            "Breaking stale writer lock on {} ({})",
                            table,
                            describe_holder(&path)
                        );
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if started.elapsed() >= policy.timeout {
                        crate::observability::metrics::storage::write_conflict(table);
                        return Err(LakehouseError::ConcurrentWriteConflict {
                            table: table.to_string(),
                            holder: describe_holder(&path),
                        });
                    }
                    thread::sleep(policy.retry_interval);
                }
                Err(e) => return Err(LakehouseError::storage_io(&path, e)),
            }
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        // Only remove the file if it is still ours; a stale-lock breaker may
        // have replaced it.
        let ours = fs::read(&self.path)
            .ok()
            .and_then(|b| serde_json::from_slice::<LockInfo>(&b).ok())
            .map_or(false, |info| info.owner == self.owner);
        if ours {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Failed to release writer lock {}: {}", self.path.display(), e);
            }
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map_or(false, |age| age > stale_after)
}

fn describe_holder(path: &Path) -> String {
    match fs::read(path)
        .ok()
        .and_then(|b| serde_json::from_slice::<LockInfo>(&b).ok())
    {
        Some(info) => format!("pid {} since {}", info.pid, info.acquired_at.to_rfc3339()),
        None => "unknown holder".to_string(),
    }
}

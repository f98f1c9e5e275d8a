use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::constants::{
    DEFAULT_CONFIG_FILE, DEFAULT_ERROR_INPUT_FILE, DEFAULT_EXPORT_FILE, DEFAULT_RAW_DATA_DIR,
    DEFAULT_REGISTRY_INPUT_DIR, DEFAULT_STORAGE_ROOT, INCIDENT_TABLE, PROVINCE_COLUMN,
    QUARANTINE_TABLE, REGISTRY_TABLE,
};
use crate::error::{LakehouseError, Result};
use crate::pipeline::storage::{LockPolicy, WriteMode};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub server: ServerConfig,
    pub export: ExportConfig,
    pub tables: TablesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub lock_timeout_ms: u64,
    pub lock_retry_ms: u64,
    pub stale_lock_secs: u64,
    pub retain_versions: usize,
    /// Superseded snapshots younger than this survive vacuum
    pub vacuum_grace_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            lock_timeout_ms: 10_000,
            lock_retry_ms: 50,
            stale_lock_secs: 600,
            retain_versions: 5,
            vacuum_grace_secs: 300,
        }
    }
}

impl StorageConfig {
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            timeout: Duration::from_millis(self.lock_timeout_ms),
            retry_interval: Duration::from_millis(self.lock_retry_ms.max(1)),
            stale_after: Duration::from_secs(self.stale_lock_secs),
        }
    }

    pub fn vacuum_grace(&self) -> Duration {
        Duration::from_secs(self.vacuum_grace_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub raw_data_dir: PathBuf,
    pub registry_input_dir: PathBuf,
    pub error_input_file: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            raw_data_dir: PathBuf::from(DEFAULT_RAW_DATA_DIR),
            registry_input_dir: PathBuf::from(DEFAULT_REGISTRY_INPUT_DIR),
            error_input_file: PathBuf::from(DEFAULT_ERROR_INPUT_FILE),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_ms: u64,
    /// Allowed CORS origins; empty means any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            request_timeout_ms: 30_000,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_file: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_file: PathBuf::from(DEFAULT_EXPORT_FILE),
        }
    }
}

/// Write policy for one logical table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TablePolicy {
    pub name: String,
    #[serde(default)]
    pub partition_column: Option<String>,
    pub default_mode: WriteMode,
    pub allowed_modes: Vec<WriteMode>,
}

impl TablePolicy {
    /// Resolve the mode for a run, rejecting modes the policy does not allow.
    pub fn resolve_mode(&self, requested: Option<WriteMode>) -> Result<WriteMode> {
        let mode = requested.unwrap_or(self.default_mode);
        if self.allowed_modes.contains(&mode) {
            Ok(mode)
        } else {
            Err(LakehouseError::mode_constraint(
                &self.name,
                format!("mode {} is not allowed for this table", mode),
            ))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    pub incidents: TablePolicy,
    pub registry: TablePolicy,
    pub quarantine: TablePolicy,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            incidents: TablePolicy {
                name: INCIDENT_TABLE.to_string(),
                partition_column: None,
                default_mode: WriteMode::Append,
                allowed_modes: vec![WriteMode::Append, WriteMode::Overwrite],
            },
            registry: TablePolicy {
                name: REGISTRY_TABLE.to_string(),
                partition_column: Some(PROVINCE_COLUMN.to_string()),
                default_mode: WriteMode::Append,
                allowed_modes: vec![
                    WriteMode::Append,
                    WriteMode::Overwrite,
                    WriteMode::DynamicOverwrite,
                ],
            },
            quarantine: TablePolicy {
                name: QUARANTINE_TABLE.to_string(),
                partition_column: None,
                default_mode: WriteMode::Overwrite,
                allowed_modes: vec![WriteMode::Overwrite],
            },
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from `lakehouse.toml` when present.
    /// A missing default file yields defaults; a missing explicit file is an error.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    Config::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            LakehouseError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("LAKEHOUSE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(host) = lookup("LAKEHOUSE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("LAKEHOUSE_PORT") {
            self.server.port = port.parse().map_err(|_| {
                LakehouseError::Config(format!("LAKEHOUSE_PORT is not a valid port: {}", port))
            })?;
        }
        if let Some(file) = lookup("LAKEHOUSE_EXPORT_FILE") {
            self.export.output_file = PathBuf::from(file);
        }
        Ok(())
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LakehouseError {
    #[error("mode constraint violated on table '{table}': {message}")]
    ModeConstraint { table: String, message: String },

    #[error("table '{table}' is locked by another writer ({holder})")]
    ConcurrentWriteConflict { table: String, holder: String },

    #[error("storage I/O error at {path}: {source}")]
    StorageIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("un-normalized join key in table '{table}', column '{column}': {value:?}")]
    JoinKeyMismatch {
        table: String,
        column: String,
        value: String,
    },

    #[error("schema mismatch on table '{table}': {message}")]
    SchemaMismatch { table: String, message: String },

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table '{table}' is corrupt: {message}")]
    CorruptTable { table: String, message: String },

    #[error("invalid filter '{field}': {message}")]
    InvalidFilter { field: String, message: String },

    #[error("source file {path} rejected: {message}")]
    SourceFormat { path: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV read failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl LakehouseError {
    pub fn storage_io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        LakehouseError::StorageIo {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn mode_constraint(table: &str, message: impl Into<String>) -> Self {
        LakehouseError::ModeConstraint {
            table: table.to_string(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code used in HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            LakehouseError::ModeConstraint { .. } => "mode_constraint",
            LakehouseError::ConcurrentWriteConflict { .. } => "concurrent_write_conflict",
            LakehouseError::StorageIo { .. } | LakehouseError::Io(_) => "storage_io",
            LakehouseError::JoinKeyMismatch { .. } => "join_key_mismatch",
            LakehouseError::SchemaMismatch { .. } => "schema_mismatch",
            LakehouseError::TableNotFound(_) => "table_not_found",
            LakehouseError::CorruptTable { .. } => "corrupt_table",
            LakehouseError::InvalidFilter { .. } => "invalid_filter",
            LakehouseError::SourceFormat { .. } => "source_format",
            LakehouseError::Config(_) | LakehouseError::Toml(_) => "config",
            LakehouseError::Json(_) | LakehouseError::Csv(_) => "serialization",
            LakehouseError::TaskJoin(_) => "internal",
        }
    }

    /// Whether a caller may simply retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LakehouseError::ConcurrentWriteConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, LakehouseError>;

/// Exit status for temporary failures (sysexits `EX_TEMPFAIL`).
pub const EXIT_TEMPFAIL: i32 = 75;

/// Process exit status for a failed command: `EXIT_TEMPFAIL` when the
/// underlying error can be retried later, 1 otherwise.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    let retryable = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<LakehouseError>())
        .any(LakehouseError::is_retryable);
    if retryable {
        EXIT_TEMPFAIL
    } else {
        1
    }
}

/// Reason codes attached to quarantined rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    TypeError,
    MissingMunicipality,
    MissingProvince,
    MissingField,
    MissingQuarter,
    InvalidQuarter,
    UpstreamValidation,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::TypeError => "type_error",
            ReasonCode::MissingMunicipality => "missing_municipality",
            ReasonCode::MissingProvince => "missing_province",
            ReasonCode::MissingField => "missing_field",
            ReasonCode::MissingQuarter => "missing_quarter",
            ReasonCode::InvalidQuarter => "invalid_quarter",
            ReasonCode::UpstreamValidation => "upstream_validation",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-level validation failure. Recovered by the normalizer, never propagated.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason} on '{field}': {detail}")]
pub struct ValidationError {
    pub reason: ReasonCode,
    pub field: String,
    pub detail: String,
}

impl ValidationError {
    pub fn new(reason: ReasonCode, field: &str, detail: impl Into<String>) -> Self {
        Self {
            reason,
            field: field.to_string(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_code_serializes_snake_case() {
        let json = serde_json::to_string(&ReasonCode::MissingMunicipality).unwrap();
        assert_eq!(json, "\"missing_municipality\"");
        assert_eq!(ReasonCode::TypeError.to_string(), "type_error");
    }

    #[test]
    fn test_only_write_conflicts_are_retryable() {
        let conflict = LakehouseError::ConcurrentWriteConflict {
            table: "t".into(),
            holder: "pid 1".into(),
        };
        assert!(conflict.is_retryable());
        assert!(!LakehouseError::TableNotFound("t".into()).is_retryable());
        assert_eq!(conflict.code(), "concurrent_write_conflict");
    }

    #[test]
    fn test_exit_code_sees_conflict_through_context() {
        use anyhow::Context;
        let conflict: Result<()> = Err(LakehouseError::ConcurrentWriteConflict {
            table: "t".into(),
            holder: "pid 1".into(),
        });
        let err = conflict.context("incident ingestion failed").unwrap_err();
        assert_eq!(exit_code(&err), EXIT_TEMPFAIL);

        let missing: Result<()> = Err(LakehouseError::TableNotFound("t".into()));
        let err = missing.context("export failed").unwrap_err();
        assert_eq!(exit_code(&err), 1);
    }
}

/// Table, column and path constants shared across ingestion, storage and analysis.

// Logical table names under the storage root
pub const INCIDENT_TABLE: &str = "lakehouse_disasters";
pub const REGISTRY_TABLE: &str = "farmer_registry";
pub const QUARANTINE_TABLE: &str = "quarantined_disasters";

// Join key columns
pub const PROVINCE_COLUMN: &str = "province";
pub const MUNICIPALITY_COLUMN: &str = "municipality";

// Default filesystem locations (relative to the working directory)
pub const DEFAULT_STORAGE_ROOT: &str = "lakehouse_data";
pub const DEFAULT_RAW_DATA_DIR: &str = "raw_data";
pub const DEFAULT_REGISTRY_INPUT_DIR: &str = "farmer_registry_input";
pub const DEFAULT_ERROR_INPUT_FILE: &str = "error_input/erroneous_rows.csv";
pub const DEFAULT_EXPORT_FILE: &str = "api_output/api_data.json";
pub const PROCESSED_DIR_NAME: &str = "processed";
pub const DEFAULT_CONFIG_FILE: &str = "lakehouse.toml";

/// Registry workbooks are named `RSBSA <PROVINCE> Rice Farmers*`.
pub const REGISTRY_FILENAME_PATTERN: &str = r"(?i)RSBSA (.*?) Rice Farmers";

/// Municipality value used when an incident row carries none.
pub const UNKNOWN_MUNICIPALITY: &str = "UNKNOWN";

/// File extensions accepted as row batches.
pub const BATCH_EXTENSIONS: [&str; 3] = ["csv", "ndjson", "jsonl"];

/// Check whether a path has one of the supported batch extensions.
pub fn is_batch_file(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| BATCH_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

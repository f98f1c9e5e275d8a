use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Trim};
use serde_json::Value;
use tracing::debug;

use super::RawBatch;
use crate::constants::is_batch_file;
use crate::domain::SourceKind;
use crate::error::{LakehouseError, Result};
use crate::pipeline::storage::Row;

/// Batch files directly inside `dir`, sorted by name. A missing directory is
/// empty. `accept` filters on the file name.
pub fn list_batch_files<F>(dir: &Path, accept: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&str) -> bool,
{
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| LakehouseError::storage_io(dir, e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_batch_file(p))
        .filter(|p| p.file_name().and_then(|n| n.to_str()).map_or(false, &accept))
        .collect();
    files.sort();
    Ok(files)
}

/// Read a CSV or NDJSON file into a raw batch.
pub fn read_batch(path: &Path, kind: SourceKind) -> Result<RawBatch> {
    let source_file = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let (columns, rows) = match extension.as_str() {
        "csv" => read_csv(path)?,
        "ndjson" | "jsonl" => read_ndjson(path)?,
        other => {
            return Err(LakehouseError::SourceFormat {
                path: path.display().to_string(),
                message: format!("unsupported extension '{}'", other),
            })
        }
    };
    debug!("Read {} rows from {}", rows.len(), source_file);
    Ok(RawBatch {
        source_file,
        kind,
        columns,
        rows,
    })
}

fn read_csv(path: &Path) -> Result<(Vec<String>, Vec<Row>)> {
    let file = File::open(path).map_err(|e| LakehouseError::storage_io(path, e))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(file);

    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let mut row = Row::new();
        for (column, field) in columns.iter().zip(record.iter()) {
            if column.is_empty() {
                continue;
            }
            row.insert(column.clone(), Value::String(field.to_string()));
        }
        rows.push(row);
    }
    Ok((columns.into_iter().filter(|c| !c.is_empty()).collect(), rows))
}

fn read_ndjson(path: &Path) -> Result<(Vec<String>, Vec<Row>)> {
    let file = File::open(path).map_err(|e| LakehouseError::storage_io(path, e))?;
    let mut columns: Vec<String> = Vec::new();
    let mut rows = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| LakehouseError::storage_io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let row = match serde_json::from_str::<Value>(&line) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(LakehouseError::SourceFormat {
                    path: path.display().to_string(),
                    message: format!("line {} is not a JSON object", index + 1),
                })
            }
            Err(e) => {
                return Err(LakehouseError::SourceFormat {
                    path: path.display().to_string(),
                    message: format!("line {}: {}", index + 1, e),
                })
            }
        };
        for key in row.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
        rows.push(row);
    }
    Ok((columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_read_csv_trims_headers_and_skips_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.csv");
        fs::write(
            &path,
            "\u{feff} province , municipality,farmers_affected\n Aklan ,Ibajay,\"1,200\"\n,,\nCapiz,Roxas,3\n",
        )
        .unwrap();
        let batch = read_batch(&path, SourceKind::Incident).unwrap();
        assert_eq!(batch.columns, vec!["province", "municipality", "farmers_affected"]);
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.rows[0]["province"], json!("Aklan"));
        assert_eq!(batch.rows[0]["farmers_affected"], json!("1,200"));
        assert_eq!(batch.source_file, "batch.csv");
    }

    #[test]
    fn test_read_ndjson_collects_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batch.ndjson");
        fs::write(&path, "{\"a\":1}\n\n{\"a\":2,\"b\":\"x\"}\n").unwrap();
        let batch = read_batch(&path, SourceKind::Incident).unwrap();
        assert_eq!(batch.columns, vec!["a", "b"]);
        assert_eq!(batch.rows[1]["b"], json!("x"));
    }

    #[test]
    fn test_read_ndjson_rejects_non_objects() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, "{\"a\":1}\n[1,2]\n").unwrap();
        let err = read_batch(&path, SourceKind::Incident).unwrap_err();
        assert!(matches!(err, LakehouseError::SourceFormat { .. }));
    }

    #[test]
    fn test_list_batch_files_filters_and_sorts() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.csv"), "x\n").unwrap();
        fs::write(dir.path().join("a.ndjson"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir(dir.path().join("processed")).unwrap();

        let files = list_batch_files(dir.path(), |_| true).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.ndjson", "b.csv"]);

        let only_b = list_batch_files(dir.path(), |n| n.starts_with('b')).unwrap();
        assert_eq!(only_b.len(), 1);
        assert!(list_batch_files(&dir.path().join("missing"), |_| true)
            .unwrap()
            .is_empty());
    }
}

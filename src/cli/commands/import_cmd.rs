use std::collections::HashMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde_json::Value;

use crate::cli::helpers::{note, parse_mapping, warn};
use crate::cli::AppContext;
use crate::error::{PipelineError, Result};
use crate::models::PageMetadata;

const DEFAULT_TABLE: &str = "pages";

/// Import a batch of page records from an external CSV file or SQLite
/// database, mapped onto `PageMetadata` via `--mapping {"field": "column"}`.
/// Required target fields: `publication_id`, `issue_date`, `sequence`,
/// `source_system`. Unmapped source columns are carried into
/// `PageMetadata::raw` for provenance. Imported pages have no image bytes
/// of their own; they're inserted with an empty image so the catalog entry
/// exists ahead of a later `download` pass filling in the original.
pub async fn cmd_import(ctx: &AppContext, source_type: String, source_path: PathBuf, mapping: Option<String>) -> Result<()> {
    let mapping = match mapping {
        Some(raw) => parse_mapping(&raw)?,
        None => default_mapping(),
    };

    let rows: Vec<HashMap<String, String>> = match source_type.as_str() {
        "csv" => read_csv_rows(&source_path)?,
        "sqlite" => read_sqlite_rows(&source_path, DEFAULT_TABLE)?,
        other => {
            return Err(PipelineError::Validation(format!(
                "unknown --source-type {other}, expected csv or sqlite"
            )))
        }
    };

    let mut imported = 0usize;
    for row in rows {
        match row_to_metadata(&row, &mapping) {
            Ok(metadata) => {
                match ctx.repo.add_page(metadata, &[], "none", None).await {
                    Ok(_) => imported += 1,
                    Err(e) if e.to_string().contains("duplicate") => {
                        warn(&format!("skipping duplicate row: {e}"));
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => warn(&format!("skipping unparsable row: {e}")),
        }
    }

    note(&format!("imported {imported} page(s)"));
    Ok(())
}

fn default_mapping() -> HashMap<String, String> {
    [
        ("publication_id", "publication_id"),
        ("issue_date", "issue_date"),
        ("sequence", "sequence"),
        ("source_system", "source_system"),
        ("title", "title"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn read_csv_rows(path: &std::path::Path) -> Result<Vec<HashMap<String, String>>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| PipelineError::Validation(format!("opening {}: {e}", path.display())))?;
    let headers = reader
        .headers()
        .map_err(|e| PipelineError::Validation(format!("reading csv headers: {e}")))?
        .clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| PipelineError::Validation(format!("reading csv row: {e}")))?;
        let mut row = HashMap::with_capacity(headers.len());
        for (col, value) in headers.iter().zip(record.iter()) {
            row.insert(col.to_string(), value.to_string());
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Read all rows of `table` from an arbitrary SQLite file via `rusqlite`,
/// not through `diesel`, since the external schema is unknown at compile
/// time and diesel's query DSL requires it.
fn read_sqlite_rows(path: &std::path::Path, table: &str) -> Result<Vec<HashMap<String, String>>> {
    let conn = rusqlite::Connection::open(path)
        .map_err(|e| PipelineError::Validation(format!("opening {}: {e}", path.display())))?;
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {table}"))
        .map_err(|e| PipelineError::Validation(format!("preparing query on table {table}: {e}")))?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let rows = stmt
        .query_map([], |row| {
            let mut map = HashMap::with_capacity(column_names.len());
            for (i, name) in column_names.iter().enumerate() {
                let value: rusqlite::types::Value = row.get(i)?;
                let text = match value {
                    rusqlite::types::Value::Null => String::new(),
                    rusqlite::types::Value::Integer(n) => n.to_string(),
                    rusqlite::types::Value::Real(f) => f.to_string(),
                    rusqlite::types::Value::Text(s) => s,
                    rusqlite::types::Value::Blob(_) => String::new(),
                };
                map.insert(name.clone(), text);
            }
            Ok(map)
        })
        .map_err(|e| PipelineError::Validation(format!("querying table {table}: {e}")))?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| PipelineError::Validation(format!("reading rows from {table}: {e}")))
}

fn row_to_metadata(row: &HashMap<String, String>, mapping: &HashMap<String, String>) -> Result<PageMetadata> {
    let get = |field: &str| -> Result<&str> {
        let column = mapping
            .get(field)
            .ok_or_else(|| PipelineError::Validation(format!("mapping has no source column for {field}")))?;
        row.get(column)
            .map(String::as_str)
            .ok_or_else(|| PipelineError::Validation(format!("row missing column {column}")))
    };

    let issue_date = NaiveDate::parse_from_str(get("issue_date")?, "%Y-%m-%d")
        .map_err(|e| PipelineError::Validation(format!("invalid issue_date: {e}")))?;
    let sequence: i32 = get("sequence")?
        .parse()
        .map_err(|e| PipelineError::Validation(format!("invalid sequence: {e}")))?;

    let mut raw: HashMap<String, Value> = HashMap::new();
    for (key, value) in row {
        if !mapping.values().any(|mapped| mapped == key) {
            raw.insert(key.clone(), Value::String(value.clone()));
        }
    }

    Ok(PageMetadata {
        publication_id: get("publication_id")?.to_string(),
        issue_date,
        sequence,
        source_system: get("source_system")?.to_string(),
        title: mapping.get("title").and_then(|col| row.get(col)).cloned(),
        raw,
    })
}

use std::path::PathBuf;

use serde::Serialize;

use crate::cli::helpers::note;
use crate::cli::AppContext;
use crate::error::{PipelineError, Result};
use crate::repository::PageSearch;

const BATCH_LIMIT: i64 = 500;

/// Flat export row: one per segment, carrying its parent page's
/// identifying fields. Pages with no segments yet still get one row with
/// empty segment fields, so `export` can run usefully right after
/// `download` and before `process`/`extract-entities`.
#[derive(Debug, Serialize)]
struct ExportRow {
    page_id: String,
    publication_id: String,
    issue_date: String,
    sequence: i32,
    page_status: String,
    segment_id: String,
    segment_kind: String,
    segment_text: String,
    segment_confidence: f32,
}

pub async fn cmd_export(ctx: &AppContext, output: PathBuf, format: String, publication: Option<String>) -> Result<()> {
    let predicate = PageSearch {
        publication_id: publication,
        ..Default::default()
    };

    let mut rows = Vec::new();
    let mut offset = 0i64;
    loop {
        let pages = ctx.repo.search_pages(&predicate, BATCH_LIMIT, offset).await?;
        if pages.is_empty() {
            break;
        }
        for page in &pages {
            let segments = ctx.repo.list_segments_for_page(&page.page_id).await?;
            if segments.is_empty() {
                rows.push(ExportRow {
                    page_id: page.page_id.clone(),
                    publication_id: page.publication_id.clone(),
                    issue_date: page.issue_date.to_string(),
                    sequence: page.sequence,
                    page_status: page.status.as_str().to_string(),
                    segment_id: String::new(),
                    segment_kind: String::new(),
                    segment_text: String::new(),
                    segment_confidence: 0.0,
                });
            } else {
                for segment in segments {
                    rows.push(ExportRow {
                        page_id: page.page_id.clone(),
                        publication_id: page.publication_id.clone(),
                        issue_date: page.issue_date.to_string(),
                        sequence: page.sequence,
                        page_status: page.status.as_str().to_string(),
                        segment_id: segment.segment_id,
                        segment_kind: segment.kind.as_str().to_string(),
                        segment_text: segment.text,
                        segment_confidence: segment.confidence,
                    });
                }
            }
        }
        offset += pages.len() as i64;
    }

    match format.as_str() {
        "json" => {
            let json = serde_json::to_vec_pretty(&rows)
                .map_err(|e| PipelineError::Internal(format!("serializing export: {e}")))?;
            std::fs::write(&output, json)?;
        }
        "csv" => {
            let mut writer = csv::Writer::from_path(&output)
                .map_err(|e| PipelineError::Internal(format!("opening {}: {e}", output.display())))?;
            for row in &rows {
                writer
                    .serialize(row)
                    .map_err(|e| PipelineError::Internal(format!("writing csv row: {e}")))?;
            }
            writer
                .flush()
                .map_err(|e| PipelineError::Internal(format!("flushing {}: {e}", output.display())))?;
        }
        other => return Err(PipelineError::Validation(format!("unknown --format {other}, expected json or csv"))),
    }

    note(&format!("exported {} row(s) to {}", rows.len(), output.display()));
    Ok(())
}

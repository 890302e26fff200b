use crate::cli::helpers::note;
use crate::cli::AppContext;
use crate::error::{PipelineError, Result};
use crate::models::{Operation, PageStatus};
use crate::repository::PageSearch;

const BATCH_LIMIT: i64 = 500;

pub async fn cmd_create(ctx: &AppContext, description: String, operation: String) -> Result<()> {
    let op = Operation::from_str(&operation)
        .ok_or_else(|| PipelineError::Validation(format!("unknown operation {operation}")))?;
    let bulk_id = ctx.queue.bulk_create(&description, op).await?;
    note(&format!("created bulk {bulk_id}"));
    println!("{bulk_id}");
    Ok(())
}

/// Gather pages of `publication` eligible for the bulk's own operation
/// (`new` pages for `ocr`, `ocr_done` pages for `segment`) and enqueue them
/// all under the existing bulk in one batch.
pub async fn cmd_add(ctx: &AppContext, bulk_id: String, publication: String) -> Result<()> {
    let bulk = ctx.queue.get_bulk(&bulk_id).await?;
    let operation = Operation::from_str(&bulk.operation)
        .ok_or_else(|| PipelineError::Internal(format!("bulk {bulk_id} has unknown operation {}", bulk.operation)))?;
    let status = match operation {
        Operation::Ocr => PageStatus::New,
        Operation::Segment => PageStatus::OcrDone,
        other => {
            return Err(PipelineError::Validation(format!(
                "bulk add only supports ocr/segment bulks, found {}",
                other.as_str()
            )))
        }
    };

    let predicate = PageSearch {
        publication_id: Some(publication),
        status: Some(status),
        ..Default::default()
    };

    let mut offset = 0i64;
    let mut added = 0usize;
    loop {
        let pages = ctx.repo.search_pages(&predicate, BATCH_LIMIT, offset).await?;
        if pages.is_empty() {
            break;
        }
        let tasks = pages
            .iter()
            .map(|page| (Some(page.page_id.clone()), operation, serde_json::Map::new(), 0, 3))
            .collect();
        let ids = ctx.queue.bulk_enqueue(&bulk_id, tasks).await?;
        added += ids.len();
        offset += pages.len() as i64;
    }

    note(&format!("added {added} task(s) to bulk {bulk_id}"));
    Ok(())
}

pub async fn cmd_status(ctx: &AppContext, bulk_id: String) -> Result<()> {
    let bulk = ctx.queue.get_bulk(&bulk_id).await?;
    println!("bulk {} [{}] {}", bulk.bulk_id, bulk.status.as_str(), bulk.description);
    println!(
        "total={} pending={} in_progress={} succeeded={} failed={}",
        bulk.counters.total, bulk.counters.pending, bulk.counters.in_progress, bulk.counters.succeeded, bulk.counters.failed
    );
    Ok(())
}

pub async fn cmd_pause(ctx: &AppContext, bulk_id: String) -> Result<()> {
    ctx.queue.pause_bulk(&bulk_id).await?;
    note(&format!("paused bulk {bulk_id}"));
    Ok(())
}

pub async fn cmd_resume(ctx: &AppContext, bulk_id: String) -> Result<()> {
    ctx.queue.resume_bulk(&bulk_id).await?;
    note(&format!("resumed bulk {bulk_id}"));
    Ok(())
}

pub async fn cmd_cancel(ctx: &AppContext, bulk_id: String) -> Result<()> {
    ctx.queue.cancel_bulk(&bulk_id).await?;
    note(&format!("cancelled bulk {bulk_id}"));
    Ok(())
}

pub async fn cmd_retry_failed(ctx: &AppContext, bulk_id: String) -> Result<()> {
    let retried = ctx.queue.retry_failed(&bulk_id).await?;
    note(&format!("retried {retried} failed task(s) in bulk {bulk_id}"));
    Ok(())
}

use chrono::NaiveDate;

use crate::cli::helpers::progress_bar;
use crate::cli::AppContext;
use crate::error::Result;
use crate::models::{Operation, PageStatus};
use crate::repository::PageSearch;

const BATCH_LIMIT: i64 = 500;

/// Enqueue OCR for every page of `publication` still at `new` (or, with
/// `--reprocess`, every page regardless of status). Segmentation is chained
/// automatically by the pipeline once OCR succeeds, so this is the only
/// enqueue step `process` needs to perform.
pub async fn cmd_process(ctx: &AppContext, publication: String, reprocess: bool) -> Result<()> {
    let predicate = PageSearch {
        publication_id: Some(publication),
        status: if reprocess { None } else { Some(PageStatus::New) },
        ..Default::default()
    };

    let mut offset = 0i64;
    let mut enqueued = 0usize;
    let bar = progress_bar(0, "enqueuing OCR");
    loop {
        let pages = ctx.repo.search_pages(&predicate, BATCH_LIMIT, offset).await?;
        if pages.is_empty() {
            break;
        }
        for page in &pages {
            ctx.queue
                .enqueue(Some(page.page_id.clone()), Operation::Ocr, serde_json::Map::new(), 0, 3, None)
                .await?;
            enqueued += 1;
            bar.inc(1);
        }
        offset += pages.len() as i64;
    }
    bar.finish_with_message(format!("enqueued OCR for {enqueued} page(s)"));
    Ok(())
}

/// Enqueue segmentation directly for pages that already have OCR output,
/// optionally restricted to a date range. Named `extract-entities` on the
/// CLI surface since segmentation is how this pipeline identifies the
/// article/headline/image/advertisement entities on a page; there is no
/// separate named-entity-recognition stage.
pub async fn cmd_extract_entities(
    ctx: &AppContext,
    publication: String,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<()> {
    let predicate = PageSearch {
        publication_id: Some(publication),
        status: Some(PageStatus::OcrDone),
        date_start: start_date,
        date_end: end_date,
        ..Default::default()
    };

    let mut offset = 0i64;
    let mut enqueued = 0usize;
    let bar = progress_bar(0, "enqueuing segmentation");
    loop {
        let pages = ctx.repo.search_pages(&predicate, BATCH_LIMIT, offset).await?;
        if pages.is_empty() {
            break;
        }
        for page in &pages {
            ctx.queue
                .enqueue(Some(page.page_id.clone()), Operation::Segment, serde_json::Map::new(), 0, 3, None)
                .await?;
            enqueued += 1;
            bar.inc(1);
        }
        offset += pages.len() as i64;
    }
    bar.finish_with_message(format!("enqueued segmentation for {enqueued} page(s)"));
    Ok(())
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Semaphore;

use crate::archive::types::{DownloadFormat, SearchQuery};
use crate::archive::ArchiveClient;
use crate::cli::helpers::{note, progress_bar, warn};
use crate::cli::AppContext;
use crate::error::Result;
use crate::models::{Operation, PageMetadata};
use crate::repository::queue::WorkQueue;
use crate::repository::RepositoryStore;

const PAGE_SIZE: u32 = 50;
const DOWNLOAD_FORMATS: [DownloadFormat; 2] = [DownloadFormat::Jp2, DownloadFormat::OcrText];

/// Page through the archive's search results for `publication` within the
/// given date range, store each result's image bytes in the repository,
/// and enqueue OCR (segmentation follows automatically once OCR
/// succeeds). `source` is accepted for forward compatibility with
/// non-Chronicling-America archives but is currently informational only —
/// the archive client only speaks the Chronicling America wire contract.
pub async fn cmd_download(
    ctx: &AppContext,
    source: Option<String>,
    publication: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    max_items: Option<usize>,
) -> Result<()> {
    if let Some(ref source) = source {
        note(&format!("source: {source} (informational; archive client targets Chronicling America)"));
    }

    let stored = Arc::new(AtomicUsize::new(0));
    let mut page_index = 0u32;
    let bar = progress_bar(0, "downloading pages");
    let semaphore = Arc::new(Semaphore::new(ctx.settings.downloader.max_workers.max(1)));

    loop {
        let query = SearchQuery {
            publication_id: Some(publication.clone()),
            date_start: Some(start_date),
            date_end: Some(end_date),
            page_index,
            page_size: PAGE_SIZE,
            ..Default::default()
        };
        let response = ctx.archive.search(query).await?;
        if let Some(adjustment) = response.adjustment {
            note(&format!(
                "requested start date {} pruned to publication's earliest issue {}",
                adjustment.original, adjustment.adjusted
            ));
        }
        if response.pages.is_empty() {
            break;
        }

        // Download/store/enqueue this page of results with up to
        // `downloader.max_workers` items in flight at once, then join
        // before paging further so pagination stays strictly sequential.
        let mut handles = Vec::with_capacity(response.pages.len());
        for metadata in response.pages {
            if max_items.is_some_and(|max| stored.load(Ordering::SeqCst) >= max) {
                break;
            }
            let archive = ctx.archive.clone();
            let repo = ctx.repo.clone();
            let queue = ctx.queue.clone();
            let semaphore = semaphore.clone();
            let stored = stored.clone();
            let bar = bar.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.unwrap();
                match download_one(&archive, &repo, &queue, metadata).await {
                    Ok(true) => {
                        stored.fetch_add(1, Ordering::SeqCst);
                        bar.inc(1);
                        Ok(())
                    }
                    Ok(false) => Ok(()),
                    Err(e) => Err(e),
                }
            }));
        }
        for handle in handles {
            handle.await.map_err(|e| crate::error::PipelineError::Internal(e.to_string()))??;
        }

        if response.pagination.current_page >= response.pagination.total_pages {
            break;
        }
        if max_items.is_some_and(|max| stored.load(Ordering::SeqCst) >= max) {
            break;
        }
        page_index += 1;
    }

    let stored = stored.load(Ordering::SeqCst);
    bar.finish_with_message(format!("stored {stored} page(s), OCR enqueued"));
    Ok(())
}

/// Download every requested format for one page, store the image, and
/// enqueue OCR. Returns `Ok(false)` for a skippable outcome (no image
/// retrieved, or the page is already present) rather than an error.
async fn download_one(
    archive: &ArchiveClient,
    repo: &RepositoryStore,
    queue: &WorkQueue,
    metadata: PageMetadata,
) -> Result<bool> {
    let manifest = archive.download(&metadata, &DOWNLOAD_FORMATS).await;
    let Some(image) = manifest.formats.iter().find(|f| f.format == DownloadFormat::Jp2) else {
        warn(&format!(
            "no image retrieved for {}/{} seq {}, skipping",
            metadata.publication_id, metadata.issue_date, metadata.sequence
        ));
        return Ok(false);
    };

    let page_id = match repo
        .add_page(metadata, &image.bytes, DownloadFormat::Jp2.extension(), None)
        .await
    {
        Ok(id) => id,
        Err(e) if e.to_string().contains("duplicate") => {
            warn(&format!("page already present, skipping: {e}"));
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    queue
        .enqueue(Some(page_id), Operation::Ocr, serde_json::Map::new(), 0, 3, None)
        .await?;
    Ok(true)
}

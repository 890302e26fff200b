//! The repository store: owns the on-disk originals/OCR/segment layout and
//! the relational index backing it, and enforces the referential
//! invariants between pages, segments, and articles.

pub mod layout;
pub mod migrations;
pub mod pool;
pub mod queue;
pub mod records;

use std::path::PathBuf;

use chrono::Utc;
use diesel::prelude::*;
use diesel::TextExpressionMethods;
use diesel_async::RunQueryDsl;

use crate::error::{PipelineError, Result};
use crate::models::{
    Article, BBox, Page, PageMetadata, PageStatus, Publication, Segment, SegmentStatus,
};
use crate::schema::*;
use crate::with_conn;

use pool::DbPool;
use records::{PageRecord, PublicationRecord, SegmentRecord};

/// Predicate accepted by `search_pages`.
#[derive(Debug, Clone, Default)]
pub struct PageSearch {
    pub publication_id: Option<String>,
    pub date_start: Option<chrono::NaiveDate>,
    pub date_end: Option<chrono::NaiveDate>,
    pub status: Option<PageStatus>,
    pub free_text: Option<String>,
}

pub struct RepositoryStore {
    pool: DbPool,
    base_dir: PathBuf,
}

impl RepositoryStore {
    pub fn new(pool: DbPool, base_dir: PathBuf) -> Self {
        Self { pool, base_dir }
    }

    pub fn base_dir(&self) -> &std::path::Path {
        &self.base_dir
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Ensure a publication row exists, creating a bare one if not. Callers
    /// that have full publication metadata should `upsert_publication`
    /// instead; this exists so `add_page` can satisfy the foreign key for
    /// archive-discovered publications we haven't fully resolved yet.
    async fn ensure_publication(&self, lccn: &str) -> Result<()> {
        with_conn!(self.pool, conn, {
            let existing: Option<PublicationRecord> = publications::table
                .find(lccn)
                .first(&mut conn)
                .await
                .optional()?;
            if existing.is_none() {
                diesel::insert_into(publications::table)
                    .values(PublicationRecord {
                        lccn: lccn.to_string(),
                        title: String::new(),
                        place: None,
                        first_issue_date: None,
                        last_issue_date: None,
                    })
                    .execute(&mut conn)
                    .await?;
            }
            Ok::<_, PipelineError>(())
        })
    }

    pub async fn upsert_publication(&self, publication: &Publication) -> Result<()> {
        let record = PublicationRecord::from(publication);
        with_conn!(self.pool, conn, {
            diesel::insert_into(publications::table)
                .values(&record)
                .on_conflict(publications::lccn)
                .do_update()
                .set((
                    publications::title.eq(&record.title),
                    publications::place.eq(&record.place),
                    publications::first_issue_date.eq(&record.first_issue_date),
                    publications::last_issue_date.eq(&record.last_issue_date),
                ))
                .execute(&mut conn)
                .await
                .map(|_| ())
                .map_err(PipelineError::from)
        })
    }

    /// Insert a new page together with its original image bytes. Atomic:
    /// the file write and the index row are performed as one logical
    /// operation — if the transaction fails after the file write, the
    /// orphaned file is removed before the error propagates.
    pub async fn add_page(
        &self,
        metadata: PageMetadata,
        image_bytes: &[u8],
        ext: &str,
        image_dims: Option<(u32, u32)>,
    ) -> Result<String> {
        self.ensure_publication(&metadata.publication_id).await?;

        let page_id = uuid::Uuid::new_v4().to_string();
        let path = layout::original_path(
            &self.base_dir,
            &metadata.source_system,
            &metadata.publication_id,
            metadata.issue_date,
            metadata.sequence,
            ext,
        );

        layout::write_atomic(&path, image_bytes)?;

        let meta_path = layout::original_meta_path(
            &self.base_dir,
            &metadata.source_system,
            &metadata.publication_id,
            metadata.issue_date,
            metadata.sequence,
        );
        let raw_json = serde_json::to_vec_pretty(&metadata.raw).unwrap_or_default();
        let _ = layout::write_atomic(&meta_path, &raw_json);

        let record = PageRecord {
            page_id: page_id.clone(),
            publication_id: metadata.publication_id.clone(),
            issue_date: metadata.issue_date.to_string(),
            sequence: metadata.sequence,
            source_system: metadata.source_system.clone(),
            image_ref: path.display().to_string(),
            ocr_text_ref: None,
            hocr_ref: None,
            status: PageStatus::New.as_str().to_string(),
            metadata: serde_json::to_string(&metadata.raw).unwrap_or_else(|_| "{}".to_string()),
            image_width: image_dims.map(|(w, _)| w as i32),
            image_height: image_dims.map(|(_, h)| h as i32),
        };

        let insert_result = with_conn!(self.pool, conn, {
            diesel::insert_into(newspaper_pages::table)
                .values(&record)
                .execute(&mut conn)
                .await
        });

        match insert_result {
            Ok(_) => Ok(page_id),
            Err(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                info,
            )) => {
                let _ = std::fs::remove_file(&path);
                let _ = std::fs::remove_file(&meta_path);
                Err(PipelineError::Conflict(format!(
                    "duplicate page for ({}, {}, {}, {}): {}",
                    metadata.publication_id,
                    metadata.issue_date,
                    metadata.sequence,
                    metadata.source_system,
                    info.message()
                )))
            }
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                let _ = std::fs::remove_file(&meta_path);
                Err(PipelineError::from(e))
            }
        }
    }

    pub async fn get_page(&self, page_id: &str) -> Result<Page> {
        let record: PageRecord = with_conn!(self.pool, conn, {
            newspaper_pages::table
                .find(page_id)
                .first(&mut conn)
                .await
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        PipelineError::NotFound(format!("page {page_id}"))
                    }
                    other => PipelineError::from(other),
                })
        })?;
        Page::try_from(record)
    }

    fn record_image_bounds(record: &PageRecord) -> Option<(u32, u32)> {
        records::page_image_bounds(record)
    }

    /// Write OCR text/HOCR artifacts and transition the page's status to
    /// `ocr_done`. Rejected if that would move the page backwards per
    /// `PageStatus::can_transition_to`.
    pub async fn attach_ocr(&self, page_id: &str, text: &str, hocr: &str) -> Result<()> {
        let record: PageRecord = with_conn!(self.pool, conn, {
            newspaper_pages::table
                .find(page_id)
                .first(&mut conn)
                .await
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        PipelineError::NotFound(format!("page {page_id}"))
                    }
                    other => PipelineError::from(other),
                })
        })?;
        let current = PageStatus::from_str(&record.status)
            .ok_or_else(|| PipelineError::Internal(format!("bad page status {}", record.status)))?;
        if !current.can_transition_to(PageStatus::OcrDone) {
            return Err(PipelineError::Validation(format!(
                "page {page_id} is {} ; cannot transition to ocr_done",
                record.status
            )));
        }

        let issue_date = records::parse_date(&record.issue_date)?;
        let text_path = layout::ocr_text_path(
            &self.base_dir,
            &record.source_system,
            &record.publication_id,
            issue_date,
            record.sequence,
        );
        let hocr_path = layout::ocr_hocr_path(
            &self.base_dir,
            &record.source_system,
            &record.publication_id,
            issue_date,
            record.sequence,
        );
        layout::write_atomic(&text_path, text.as_bytes())?;
        layout::write_atomic(&hocr_path, hocr.as_bytes())?;

        with_conn!(self.pool, conn, {
            diesel::update(newspaper_pages::table.find(page_id))
                .set((
                    newspaper_pages::ocr_text_ref.eq(text_path.display().to_string()),
                    newspaper_pages::hocr_ref.eq(hocr_path.display().to_string()),
                    newspaper_pages::status.eq(PageStatus::OcrDone.as_str()),
                ))
                .execute(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        Ok(())
    }

    /// Insert segments for a page transactionally, validating each bbox
    /// against the parent page's image bounds and each confidence against
    /// `[0, 1]`. Transitions the page's status to `segmented`; rejected if
    /// that would move the page backwards per `PageStatus::can_transition_to`.
    pub async fn add_segments(&self, page_id: &str, segments: &[Segment]) -> Result<()> {
        let page_record: PageRecord = with_conn!(self.pool, conn, {
            newspaper_pages::table
                .find(page_id)
                .first(&mut conn)
                .await
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        PipelineError::NotFound(format!("page {page_id}"))
                    }
                    other => PipelineError::from(other),
                })
        })?;

        let current = PageStatus::from_str(&page_record.status)
            .ok_or_else(|| PipelineError::Internal(format!("bad page status {}", page_record.status)))?;
        if !current.can_transition_to(PageStatus::Segmented) {
            return Err(PipelineError::Validation(format!(
                "page {page_id} is {} ; cannot transition to segmented",
                page_record.status
            )));
        }

        if let Some((w, h)) = Self::record_image_bounds(&page_record) {
            for s in segments {
                if !s.bbox.within(w, h) {
                    return Err(PipelineError::Validation(format!(
                        "segment {} bbox {:?} exceeds page bounds {w}x{h}",
                        s.segment_id, s.bbox
                    )));
                }
            }
        }
        for s in segments {
            if !s.confidence_in_range() {
                return Err(PipelineError::Validation(format!(
                    "segment {} confidence {} out of [0,1]",
                    s.segment_id, s.confidence
                )));
            }
            if s.page_id != page_id {
                return Err(PipelineError::Validation(format!(
                    "segment {} targets page {} but was added under page {page_id}",
                    s.segment_id, s.page_id
                )));
            }
        }

        let records: Vec<SegmentRecord> = segments.iter().map(SegmentRecord::from).collect();

        with_conn!(self.pool, conn, {
            use diesel_async::AsyncConnection;
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let records = records.clone_boxed();
                Box::pin(async move {
                    diesel::insert_into(article_segments::table)
                        .values(&records)
                        .execute(conn)
                        .await?;
                    diesel::update(newspaper_pages::table.find(page_id))
                        .set(newspaper_pages::status.eq(PageStatus::Segmented.as_str()))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .await
            .map_err(PipelineError::from)
        })
    }

    pub async fn list_segments_for_page(&self, page_id: &str) -> Result<Vec<Segment>> {
        let records: Vec<SegmentRecord> = with_conn!(self.pool, conn, {
            article_segments::table
                .filter(article_segments::page_id.eq(page_id))
                .load(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        records.into_iter().map(Segment::try_from).collect()
    }

    /// `predicate.free_text` matches against the page's OCR output, not any
    /// index-row column — the OCR text itself lives in a file referenced by
    /// `ocr_text_ref` (§4.1's on-disk layout), so candidates are narrowed by
    /// the SQL filters first and the free-text match is applied by reading
    /// each candidate's OCR file, with `limit`/`offset` applied afterward.
    pub async fn search_pages(
        &self,
        predicate: &PageSearch,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Page>> {
        let free_text = predicate.free_text.clone();
        let records: Vec<PageRecord> = with_conn!(self.pool, conn, {
            let mut query = newspaper_pages::table.into_boxed();
            if let Some(ref pid) = predicate.publication_id {
                query = query.filter(newspaper_pages::publication_id.eq(pid));
            }
            if let Some(date) = predicate.date_start {
                query = query.filter(newspaper_pages::issue_date.ge(date.to_string()));
            }
            if let Some(date) = predicate.date_end {
                query = query.filter(newspaper_pages::issue_date.le(date.to_string()));
            }
            if let Some(status) = predicate.status {
                query = query.filter(newspaper_pages::status.eq(status.as_str()));
            }
            if free_text.is_some() {
                query = query.filter(newspaper_pages::ocr_text_ref.is_not_null());
            }
            let mut query =
                query.order((newspaper_pages::issue_date.asc(), newspaper_pages::sequence.asc()));
            if free_text.is_none() {
                query = query.limit(limit).offset(offset);
            }
            query.load(&mut conn).await.map_err(PipelineError::from)
        })?;
        let pages = records
            .into_iter()
            .map(Page::try_from)
            .collect::<Result<Vec<_>>>()?;

        let Some(text) = free_text else {
            return Ok(pages);
        };
        let needle = text.to_lowercase();
        let matched = pages.into_iter().filter(|page| {
            page.ocr_text_ref
                .as_deref()
                .and_then(|path| std::fs::read_to_string(path).ok())
                .is_some_and(|contents| contents.to_lowercase().contains(&needle))
        });
        Ok(matched.skip(offset.max(0) as usize).take(limit.max(0) as usize).collect())
    }

    /// Delete a page, cascading to its segments, articles, and any tasks
    /// that reference it (foreign keys declare `ON DELETE CASCADE`;
    /// `processing_queue.page_id` is checked here too for defense in
    /// depth since SQLite cascade behavior depends on `PRAGMA
    /// foreign_keys` being enabled per-connection).
    pub async fn delete_page(&self, page_id: &str) -> Result<()> {
        with_conn!(self.pool, conn, {
            use diesel_async::AsyncConnection;
            let page_id = page_id.to_string();
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let page_id = page_id.clone();
                Box::pin(async move {
                    diesel::delete(
                        processing_queue::table.filter(processing_queue::page_id.eq(&page_id)),
                    )
                    .execute(conn)
                    .await?;
                    diesel::delete(
                        newspaper_articles::table.filter(newspaper_articles::page_id.eq(&page_id)),
                    )
                    .execute(conn)
                    .await?;
                    diesel::delete(
                        article_segments::table.filter(article_segments::page_id.eq(&page_id)),
                    )
                    .execute(conn)
                    .await?;
                    diesel::delete(newspaper_pages::table.find(&page_id))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .await
            .map_err(PipelineError::from)
        })
    }

    pub async fn add_article(&self, article: &Article) -> Result<()> {
        for segment_id in &article.segment_ids {
            let record: SegmentRecord = with_conn!(self.pool, conn, {
                article_segments::table
                    .find(segment_id)
                    .first(&mut conn)
                    .await
                    .map_err(|e| match e {
                        diesel::result::Error::NotFound => {
                            PipelineError::NotFound(format!("segment {segment_id}"))
                        }
                        other => PipelineError::from(other),
                    })
            })?;
            if record.page_id != article.page_id {
                return Err(PipelineError::Validation(format!(
                    "segment {segment_id} belongs to page {} not {}",
                    record.page_id, article.page_id
                )));
            }
        }

        with_conn!(self.pool, conn, {
            diesel::insert_into(newspaper_articles::table)
                .values((
                    newspaper_articles::article_id.eq(&article.article_id),
                    newspaper_articles::page_id.eq(&article.page_id),
                    newspaper_articles::segment_ids
                        .eq(serde_json::to_string(&article.segment_ids).unwrap_or_default()),
                    newspaper_articles::title.eq(&article.title),
                    newspaper_articles::combined_text.eq(&article.combined_text),
                    newspaper_articles::metadata
                        .eq(serde_json::to_string(&article.metadata).unwrap_or_default()),
                ))
                .execute(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        Ok(())
    }

    pub async fn get_article(&self, article_id: &str) -> Result<Article> {
        #[derive(Queryable)]
        struct Row {
            article_id: String,
            page_id: String,
            segment_ids: String,
            title: String,
            combined_text: String,
            metadata: String,
        }

        let row: Row = with_conn!(self.pool, conn, {
            newspaper_articles::table
                .find(article_id)
                .select((
                    newspaper_articles::article_id,
                    newspaper_articles::page_id,
                    newspaper_articles::segment_ids,
                    newspaper_articles::title,
                    newspaper_articles::combined_text,
                    newspaper_articles::metadata,
                ))
                .first(&mut conn)
                .await
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        PipelineError::NotFound(format!("article {article_id}"))
                    }
                    other => PipelineError::from(other),
                })
        })?;

        Ok(Article {
            article_id: row.article_id,
            page_id: row.page_id,
            segment_ids: serde_json::from_str(&row.segment_ids).unwrap_or_default(),
            title: row.title,
            combined_text: row.combined_text,
            metadata: serde_json::from_str(&row.metadata).unwrap_or_default(),
        })
    }

    /// Mark a segment as promoted once the connector has linked it to an
    /// event. Called by the cross-DB connector, not directly by the CLI.
    pub async fn mark_segment_promoted(&self, segment_id: &str) -> Result<()> {
        with_conn!(self.pool, conn, {
            diesel::update(article_segments::table.find(segment_id))
                .set(article_segments::status.eq(SegmentStatus::Promoted.as_str()))
                .execute(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        Ok(())
    }

    pub async fn get_segment(&self, segment_id: &str) -> Result<Segment> {
        let record: SegmentRecord = with_conn!(self.pool, conn, {
            article_segments::table
                .find(segment_id)
                .first(&mut conn)
                .await
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        PipelineError::NotFound(format!("segment {segment_id}"))
                    }
                    other => PipelineError::from(other),
                })
        })?;
        Segment::try_from(record)
    }
}

/// Extension used only to make `Vec<SegmentRecord>` cloneable into the
/// `'static` future required by `diesel_async`'s transaction closure.
trait CloneBoxed {
    fn clone_boxed(&self) -> Self;
}

impl CloneBoxed for Vec<SegmentRecord> {
    fn clone_boxed(&self) -> Self {
        self.iter()
            .map(|r| SegmentRecord {
                segment_id: r.segment_id.clone(),
                page_id: r.page_id.clone(),
                kind: r.kind.clone(),
                bbox_x: r.bbox_x,
                bbox_y: r.bbox_y,
                bbox_w: r.bbox_w,
                bbox_h: r.bbox_h,
                text: r.text.clone(),
                confidence: r.confidence,
                image_clip_ref: r.image_clip_ref.clone(),
                status: r.status.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::models::{BBox, SegmentKind, SegmentStatus};
    use crate::repository::migrations::{run_migrations, REPOSITORY_MIGRATIONS};

    async fn test_store() -> (RepositoryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("repo.sqlite");
        let url = db_path.display().to_string();
        run_migrations(&url, REPOSITORY_MIGRATIONS).await.unwrap();
        let base_dir = dir.path().join("files");
        (RepositoryStore::new(DbPool::new(url), base_dir), dir)
    }

    fn sample_metadata() -> PageMetadata {
        PageMetadata {
            publication_id: "sn83045604".to_string(),
            issue_date: chrono::NaiveDate::from_ymd_opt(1891, 4, 15).unwrap(),
            sequence: 1,
            source_system: "chroniclingamerica".to_string(),
            title: Some("The Daily Herald".to_string()),
            raw: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn add_page_then_get_page_round_trips() {
        let (store, _dir) = test_store().await;
        let page_id = store
            .add_page(sample_metadata(), b"fake-jpeg-bytes", "jpg", Some((1000, 1400)))
            .await
            .unwrap();

        let page = store.get_page(&page_id).await.unwrap();
        assert_eq!(page.publication_id, "sn83045604");
        assert_eq!(page.sequence, 1);
        assert_eq!(page.status, PageStatus::New);
        assert!(std::path::Path::new(&page.image_ref).exists());
    }

    #[tokio::test]
    async fn duplicate_page_is_rejected_and_file_not_orphaned() {
        let (store, _dir) = test_store().await;
        store
            .add_page(sample_metadata(), b"bytes-1", "jpg", None)
            .await
            .unwrap();

        let err = store
            .add_page(sample_metadata(), b"bytes-2", "jpg", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)));

        // Only one page row should exist for the unique key.
        let pages = store
            .search_pages(
                &PageSearch {
                    publication_id: Some("sn83045604".to_string()),
                    ..Default::default()
                },
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
    }

    #[tokio::test]
    async fn attach_ocr_rejects_backwards_transition() {
        let (store, _dir) = test_store().await;
        let page_id = store
            .add_page(sample_metadata(), b"bytes", "jpg", None)
            .await
            .unwrap();

        // A page already past `ocr_done` cannot be walked backwards by
        // re-attaching OCR output.
        with_conn!(store.pool, conn, {
            diesel::update(newspaper_pages::table.find(&page_id))
                .set(newspaper_pages::status.eq(PageStatus::Segmented.as_str()))
                .execute(&mut conn)
                .await
                .unwrap()
        });
        let err = store.attach_ocr(&page_id, "text", "<html/>").await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        with_conn!(store.pool, conn, {
            diesel::update(newspaper_pages::table.find(&page_id))
                .set(newspaper_pages::status.eq(PageStatus::Queued.as_str()))
                .execute(&mut conn)
                .await
                .unwrap()
        });

        store.attach_ocr(&page_id, "hello world", "<html/>").await.unwrap();
        let page = store.get_page(&page_id).await.unwrap();
        assert_eq!(page.status, PageStatus::OcrDone);
        assert!(page.ocr_text_ref.is_some());
        assert!(page.hocr_ref.is_some());
        assert_eq!(
            std::fs::read_to_string(page.ocr_text_ref.unwrap()).unwrap(),
            "hello world"
        );
    }

    fn sample_segment(page_id: &str, bbox: BBox, confidence: f32) -> Segment {
        Segment {
            segment_id: uuid::Uuid::new_v4().to_string(),
            page_id: page_id.to_string(),
            kind: SegmentKind::Article,
            bbox,
            text: "Local news roundup".to_string(),
            confidence,
            image_clip_ref: None,
            status: SegmentStatus::Draft,
        }
    }

    #[tokio::test]
    async fn add_segments_within_bounds_transitions_page_to_segmented() {
        let (store, _dir) = test_store().await;
        let page_id = store
            .add_page(sample_metadata(), b"bytes", "jpg", Some((1000, 1400)))
            .await
            .unwrap();

        let seg = sample_segment(&page_id, BBox { x: 10, y: 10, w: 200, h: 100 }, 0.9);
        store.add_segments(&page_id, &[seg]).await.unwrap();

        let page = store.get_page(&page_id).await.unwrap();
        assert_eq!(page.status, PageStatus::Segmented);
        let segments = store.list_segments_for_page(&page_id).await.unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[tokio::test]
    async fn add_segments_rejects_bbox_outside_page_bounds() {
        let (store, _dir) = test_store().await;
        let page_id = store
            .add_page(sample_metadata(), b"bytes", "jpg", Some((100, 100)))
            .await
            .unwrap();

        let seg = sample_segment(&page_id, BBox { x: 50, y: 50, w: 100, h: 100 }, 0.9);
        let err = store.add_segments(&page_id, &[seg]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        // Rejected batch must not have transitioned the page or inserted a row.
        let page = store.get_page(&page_id).await.unwrap();
        assert_eq!(page.status, PageStatus::New);
        assert!(store.list_segments_for_page(&page_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_segments_rejects_out_of_range_confidence() {
        let (store, _dir) = test_store().await;
        let page_id = store
            .add_page(sample_metadata(), b"bytes", "jpg", Some((1000, 1000)))
            .await
            .unwrap();

        let seg = sample_segment(&page_id, BBox { x: 0, y: 0, w: 10, h: 10 }, 1.2);
        let err = store.add_segments(&page_id, &[seg]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_page_cascades_to_segments_and_articles() {
        let (store, _dir) = test_store().await;
        let page_id = store
            .add_page(sample_metadata(), b"bytes", "jpg", Some((1000, 1000)))
            .await
            .unwrap();
        let seg = sample_segment(&page_id, BBox { x: 0, y: 0, w: 10, h: 10 }, 0.8);
        let segment_id = seg.segment_id.clone();
        store.add_segments(&page_id, &[seg]).await.unwrap();
        store
            .add_article(&Article {
                article_id: "art-1".to_string(),
                page_id: page_id.clone(),
                segment_ids: vec![segment_id.clone()],
                title: "Roundup".to_string(),
                combined_text: "Local news roundup".to_string(),
                metadata: HashMap::new(),
            })
            .await
            .unwrap();

        store.delete_page(&page_id).await.unwrap();

        assert!(matches!(
            store.get_page(&page_id).await.unwrap_err(),
            PipelineError::NotFound(_)
        ));
        assert!(matches!(
            store.get_segment(&segment_id).await.unwrap_err(),
            PipelineError::NotFound(_)
        ));
        assert!(matches!(
            store.get_article("art-1").await.unwrap_err(),
            PipelineError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn add_article_rejects_segment_from_a_different_page() {
        let (store, _dir) = test_store().await;
        let page_id = store
            .add_page(sample_metadata(), b"bytes", "jpg", Some((1000, 1000)))
            .await
            .unwrap();
        let other_meta = PageMetadata {
            sequence: 2,
            ..sample_metadata()
        };
        let other_page_id = store
            .add_page(other_meta, b"bytes-2", "jpg", Some((1000, 1000)))
            .await
            .unwrap();

        let seg = sample_segment(&other_page_id, BBox { x: 0, y: 0, w: 10, h: 10 }, 0.8);
        let segment_id = seg.segment_id.clone();
        store.add_segments(&other_page_id, &[seg]).await.unwrap();

        let err = store
            .add_article(&Article {
                article_id: "art-x".to_string(),
                page_id: page_id.clone(),
                segment_ids: vec![segment_id],
                title: "Mismatch".to_string(),
                combined_text: String::new(),
                metadata: HashMap::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn search_pages_filters_by_date_range_and_status() {
        let (store, _dir) = test_store().await;
        let early = PageMetadata {
            issue_date: chrono::NaiveDate::from_ymd_opt(1891, 1, 1).unwrap(),
            sequence: 1,
            ..sample_metadata()
        };
        let late = PageMetadata {
            issue_date: chrono::NaiveDate::from_ymd_opt(1891, 12, 1).unwrap(),
            sequence: 2,
            ..sample_metadata()
        };
        store.add_page(early, b"a", "jpg", None).await.unwrap();
        store.add_page(late, b"b", "jpg", None).await.unwrap();

        let results = store
            .search_pages(
                &PageSearch {
                    date_start: Some(chrono::NaiveDate::from_ymd_opt(1891, 6, 1).unwrap()),
                    date_end: Some(chrono::NaiveDate::from_ymd_opt(1891, 12, 31).unwrap()),
                    ..Default::default()
                },
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].sequence, 2);
    }

    #[tokio::test]
    async fn search_pages_free_text_matches_ocr_content_not_metadata() {
        let (store, _dir) = test_store().await;
        let with_match = PageMetadata { sequence: 1, ..sample_metadata() };
        let without_match = PageMetadata { sequence: 2, ..sample_metadata() };
        let match_id = store.add_page(with_match, b"a", "jpg", None).await.unwrap();
        let other_id = store.add_page(without_match, b"b", "jpg", None).await.unwrap();

        for id in [&match_id, &other_id] {
            with_conn!(store.pool, conn, {
                diesel::update(newspaper_pages::table.find(id))
                    .set(newspaper_pages::status.eq(PageStatus::Queued.as_str()))
                    .execute(&mut conn)
                    .await
                    .unwrap()
            });
        }
        store.attach_ocr(&match_id, "the great railroad strike", "<html/>").await.unwrap();
        store.attach_ocr(&other_id, "local harvest festival", "<html/>").await.unwrap();

        let results = store
            .search_pages(
                &PageSearch { free_text: Some("railroad".into()), ..Default::default() },
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].page_id, match_id);
    }
}


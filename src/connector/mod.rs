//! Cross-DB connector: promotes article segments into the main events
//! store, with duplicate detection and bidirectional linkage via
//! `event_links`. Duplicate grouping uses an approximate token-set Jaccard
//! match over body text rather than exact `content_hash` equality, since
//! promoted text is independently OCR'd and re-typed text will rarely hash
//! identically even when it describes the same event.
//!
//! This is the one component that holds handles to both SQLite databases;
//! everywhere else in the crate, one store is primary and the other is
//! opaque.

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, Result};
use crate::models::Event;
use crate::repository::pool::DbPool;
use crate::repository::RepositoryStore;
use crate::schema::event_links;
use crate::schema_main::events;
use crate::search::FuzzyMatcher;
use crate::with_conn;

const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = events)]
struct EventRecord {
    event_id: String,
    title: String,
    event_date: String,
    body: String,
    source_description: String,
    content_hash: String,
    created_at: String,
}

#[derive(Debug, Queryable, Insertable, Clone)]
#[diesel(table_name = event_links)]
struct EventLinkRecord {
    segment_id: String,
    event_id: String,
    content_hash: String,
    created_at: String,
}

/// Fields a caller may override when promoting a segment; anything left
/// `None` is derived from the segment and its parent page.
#[derive(Debug, Clone, Default)]
pub struct PromoteOverrides {
    pub title: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DuplicateCandidate {
    pub event_id: String,
    pub title: String,
    pub event_date: NaiveDate,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub removed_dangling_links: usize,
    pub attached_orphans: usize,
}

pub struct Connector {
    repo: std::sync::Arc<RepositoryStore>,
    repo_pool: DbPool,
    main_pool: DbPool,
}

impl Connector {
    pub fn new(repo: std::sync::Arc<RepositoryStore>, main_pool: DbPool) -> Self {
        let repo_pool = repo.pool().clone();
        Self { repo, repo_pool, main_pool }
    }

    /// Promote a segment into the main store. Runs duplicate detection
    /// first: a match at or above
    /// `DEFAULT_DUPLICATE_THRESHOLD` reuses the existing event instead of
    /// inserting a new one. The event insert and the `event_links` write
    /// are two separate databases and can't share a transaction — if the
    /// link write fails after a successful insert, `reconcile()` picks up
    /// the orphan later; the link table, not the event row, is the
    /// authority on whether a segment has been promoted.
    pub async fn promote(&self, segment_id: &str, overrides: Option<PromoteOverrides>) -> Result<String> {
        let overrides = overrides.unwrap_or_default();
        let segment = self.repo.get_segment(segment_id).await?;
        let page = self.repo.get_page(&segment.page_id).await?;

        let body = overrides.body.unwrap_or_else(|| segment.text.clone());
        let title = overrides.title.unwrap_or_else(|| derive_title(&body));
        let event_date = overrides.event_date.unwrap_or(page.issue_date);
        let source_description = format!(
            "{} issue {} seq {} ({})",
            page.publication_id, page.issue_date, page.sequence, page.source_system
        );
        let content_hash = hash_text(&body);

        let duplicates = self
            .find_duplicates(&body, Some(&title), Some(event_date), DEFAULT_DUPLICATE_THRESHOLD)
            .await?;

        let event_id = if let Some(best) = duplicates.into_iter().max_by(|a, b| {
            a.similarity.partial_cmp(&b.similarity).unwrap_or(std::cmp::Ordering::Equal)
        }) {
            best.event_id
        } else {
            let event_id = uuid::Uuid::new_v4().to_string();
            let record = EventRecord {
                event_id: event_id.clone(),
                title,
                event_date: event_date.to_string(),
                body,
                source_description,
                content_hash: content_hash.clone(),
                created_at: Utc::now().to_rfc3339(),
            };
            with_conn!(self.main_pool, conn, {
                diesel::insert_into(events::table)
                    .values(&record)
                    .execute(&mut conn)
                    .await
                    .map_err(PipelineError::from)
            })?;
            event_id
        };

        let link = EventLinkRecord {
            segment_id: segment_id.to_string(),
            event_id: event_id.clone(),
            content_hash,
            created_at: Utc::now().to_rfc3339(),
        };
        with_conn!(self.repo_pool, conn, {
            diesel::insert_into(event_links::table)
                .values(&link)
                .on_conflict(event_links::segment_id)
                .do_update()
                .set((
                    event_links::event_id.eq(&link.event_id),
                    event_links::content_hash.eq(&link.content_hash),
                ))
                .execute(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        self.repo.mark_segment_promoted(segment_id).await?;

        Ok(event_id)
    }

    /// Candidates are events dated within +/-1 day of `date` (when given)
    /// whose token-set Jaccard similarity to `text` is >= `threshold`.
    /// `title` additionally nudges ranking via fuzzy title similarity but
    /// never substitutes for the body comparison.
    pub async fn find_duplicates(
        &self,
        text: &str,
        title: Option<&str>,
        date: Option<NaiveDate>,
        threshold: f64,
    ) -> Result<Vec<DuplicateCandidate>> {
        let candidates: Vec<EventRecord> = with_conn!(self.main_pool, conn, {
            let mut query = events::table.into_boxed();
            if let Some(d) = date {
                let lo = (d - chrono::Duration::days(1)).to_string();
                let hi = (d + chrono::Duration::days(1)).to_string();
                query = query
                    .filter(events::event_date.ge(lo))
                    .filter(events::event_date.le(hi));
            }
            query.load(&mut conn).await.map_err(PipelineError::from)
        })?;

        let query_tokens = token_set(text);
        let mut results = Vec::new();
        for record in candidates {
            let mut similarity = jaccard_similarity(&query_tokens, &token_set(&record.body));
            if let Some(t) = title {
                let title_sim = f64::from(FuzzyMatcher::similarity(t, &record.title)) / 100.0;
                similarity = similarity.max(title_sim * 0.9);
            }
            if similarity >= threshold {
                let event_date = crate::repository::records::parse_date(&record.event_date)?;
                results.push(DuplicateCandidate {
                    event_id: record.event_id,
                    title: record.title,
                    event_date,
                    similarity,
                });
            }
        }
        results.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }

    /// Push the segment's current text into the event it's linked to.
    pub async fn sync_to_main(&self, segment_id: &str) -> Result<()> {
        let link = self.link_by_segment(segment_id).await?;
        let segment = self.repo.get_segment(segment_id).await?;
        let content_hash = hash_text(&segment.text);

        with_conn!(self.main_pool, conn, {
            diesel::update(events::table.find(&link.event_id))
                .set((events::body.eq(&segment.text), events::content_hash.eq(&content_hash)))
                .execute(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        with_conn!(self.repo_pool, conn, {
            diesel::update(event_links::table.find(segment_id))
                .set(event_links::content_hash.eq(&content_hash))
                .execute(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;
        Ok(())
    }

    /// Pull an event's body back into every segment linked to it. Returns
    /// the number of segments updated.
    pub async fn sync_from_main(&self, event_id: &str) -> Result<usize> {
        let event = self.get_event(event_id).await?;
        let links = self.links_by_event(event_id).await?;
        for link in &links {
            with_conn!(self.repo_pool, conn, {
                diesel::update(crate::schema::article_segments::table.find(&link.segment_id))
                    .set(crate::schema::article_segments::text.eq(&event.body))
                    .execute(&mut conn)
                    .await
                    .map_err(PipelineError::from)
            })?;
        }
        Ok(links.len())
    }

    /// Reconciliation pass for the at-least-once promotion gap: removes
    /// `event_links` rows pointing at an event that no longer exists in
    /// the main store, and attaches a missing
    /// link for any main-store event whose `content_hash` matches an
    /// unlinked segment's own text hash.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let links: Vec<EventLinkRecord> = with_conn!(self.repo_pool, conn, {
            event_links::table.load(&mut conn).await.map_err(PipelineError::from)
        })?;

        for link in &links {
            let exists: Option<EventRecord> = with_conn!(self.main_pool, conn, {
                events::table
                    .find(&link.event_id)
                    .first(&mut conn)
                    .await
                    .optional()
                    .map_err(PipelineError::from)
            })?;
            if exists.is_none() {
                with_conn!(self.repo_pool, conn, {
                    diesel::delete(event_links::table.find(&link.segment_id))
                        .execute(&mut conn)
                        .await
                        .map_err(PipelineError::from)
                })?;
                report.removed_dangling_links += 1;
            }
        }

        let linked_hashes: HashSet<String> = links.iter().map(|l| l.content_hash.clone()).collect();
        let main_events: Vec<EventRecord> = with_conn!(self.main_pool, conn, {
            events::table.load(&mut conn).await.map_err(PipelineError::from)
        })?;

        for event in main_events {
            if linked_hashes.contains(&event.content_hash) {
                continue;
            }
            if let Some(segment_id) = self.unlinked_segment_by_hash(&event.content_hash).await? {
                let link = EventLinkRecord {
                    segment_id: segment_id.clone(),
                    event_id: event.event_id.clone(),
                    content_hash: event.content_hash.clone(),
                    created_at: Utc::now().to_rfc3339(),
                };
                with_conn!(self.repo_pool, conn, {
                    diesel::insert_into(event_links::table)
                        .values(&link)
                        .execute(&mut conn)
                        .await
                        .map_err(PipelineError::from)
                })?;
                self.repo.mark_segment_promoted(&segment_id).await?;
                report.attached_orphans += 1;
            }
        }

        Ok(report)
    }

    async fn get_event(&self, event_id: &str) -> Result<Event> {
        let record: EventRecord = with_conn!(self.main_pool, conn, {
            events::table
                .find(event_id)
                .first(&mut conn)
                .await
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        PipelineError::NotFound(format!("event {event_id}"))
                    }
                    other => PipelineError::from(other),
                })
        })?;
        Ok(Event {
            event_id: record.event_id,
            title: record.title,
            event_date: crate::repository::records::parse_date(&record.event_date)?,
            body: record.body,
            source_description: record.source_description,
            content_hash: record.content_hash,
            created_at: crate::repository::records::parse_datetime(&record.created_at)?,
        })
    }

    async fn link_by_segment(&self, segment_id: &str) -> Result<EventLinkRecord> {
        with_conn!(self.repo_pool, conn, {
            event_links::table
                .find(segment_id)
                .first(&mut conn)
                .await
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        PipelineError::NotFound(format!("no event link for segment {segment_id}"))
                    }
                    other => PipelineError::from(other),
                })
        })
    }

    async fn links_by_event(&self, event_id: &str) -> Result<Vec<EventLinkRecord>> {
        with_conn!(self.repo_pool, conn, {
            event_links::table
                .filter(event_links::event_id.eq(event_id))
                .load(&mut conn)
                .await
                .map_err(PipelineError::from)
        })
    }

    /// A segment with no `event_links` row whose own text hashes to
    /// `content_hash` — the key `reconcile()` matches orphaned events on.
    async fn unlinked_segment_by_hash(&self, content_hash: &str) -> Result<Option<String>> {
        use crate::schema::article_segments;

        let candidates: Vec<(String, String)> = with_conn!(self.repo_pool, conn, {
            article_segments::table
                .filter(
                    article_segments::segment_id
                        .ne_all(event_links::table.select(event_links::segment_id)),
                )
                .select((article_segments::segment_id, article_segments::text))
                .load(&mut conn)
                .await
                .map_err(PipelineError::from)
        })?;

        Ok(candidates
            .into_iter()
            .find(|(_, text)| hash_text(text) == content_hash)
            .map(|(segment_id, _)| segment_id))
    }
}

fn derive_title(body: &str) -> String {
    body.lines()
        .next()
        .unwrap_or("")
        .chars()
        .take(120)
        .collect()
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn token_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_identical_text_is_one() {
        let a = token_set("the great fire destroyed the mill");
        let b = token_set("the great fire destroyed the mill");
        assert_eq!(jaccard_similarity(&a, &b), 1.0);
    }

    #[test]
    fn jaccard_disjoint_text_is_zero() {
        let a = token_set("a storm hit the coast");
        let b = token_set("election results announced today");
        assert_eq!(jaccard_similarity(&a, &b), 0.0);
    }

    #[test]
    fn jaccard_partial_overlap_is_between_bounds() {
        let a = token_set("great fire destroys downtown mill");
        let b = token_set("great fire destroys the old mill building");
        let sim = jaccard_similarity(&a, &b);
        assert!(sim > 0.0 && sim < 1.0);
    }

    #[test]
    fn derive_title_takes_first_line() {
        let title = derive_title("Great Fire Destroys Mill\nMore text follows here.");
        assert_eq!(title, "Great Fire Destroys Mill");
    }

    #[test]
    fn hash_text_is_stable() {
        assert_eq!(hash_text("same input"), hash_text("same input"));
        assert_ne!(hash_text("same input"), hash_text("different input"));
    }
}

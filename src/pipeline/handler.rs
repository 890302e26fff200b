//! Operations the pipeline service can't perform on its own — reindexing,
//! export/import, and promotion live in the search index and cross-DB
//! connector, which the pipeline doesn't own. Rather than reaching for a
//! global singleton, the service is handed a trait object at construction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::connector::{Connector, PromoteOverrides};
use crate::error::{PipelineError, Result};
use crate::models::Task;
use crate::repository::{PageSearch, RepositoryStore};
use crate::search::{SearchEntry, SearchIndex, SearchSource};

/// Handlers for operations that reach outside the repository store +
/// OCR engine the pipeline already owns directly.
#[async_trait]
pub trait ExternalOperations: Send + Sync {
    async fn reindex(&self, task: &Task) -> Result<()>;
    async fn export(&self, task: &Task) -> Result<()>;
    async fn import(&self, task: &Task) -> Result<()>;
    async fn promote(&self, task: &Task) -> Result<()>;
}

fn string_param(task: &Task, key: &str) -> Option<String> {
    task.parameters.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn date_param(task: &Task, key: &str) -> Option<NaiveDate> {
    string_param(task, key).and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

/// The production `ExternalOperations`: thin parameter-unpacking wrappers
/// around `RepositoryStore`, `SearchIndex`, and `Connector`, so a bulk
/// `reindex`/`export`/`import`/`promote` task does exactly what the
/// equivalent CLI command does, queued and retried like any other task.
pub struct DefaultExternalOperations {
    repo: Arc<RepositoryStore>,
    search: Arc<SearchIndex>,
    connector: Arc<Connector>,
}

impl DefaultExternalOperations {
    pub fn new(repo: Arc<RepositoryStore>, search: Arc<SearchIndex>, connector: Arc<Connector>) -> Self {
        Self { repo, search, connector }
    }

    async fn segments_for_publication(&self, publication_id: Option<&str>) -> Result<Vec<SearchEntry>> {
        const BATCH_LIMIT: i64 = 500;
        let predicate = PageSearch {
            publication_id: publication_id.map(str::to_string),
            ..Default::default()
        };
        let mut entries = Vec::new();
        let mut offset = 0i64;
        loop {
            let pages = self.repo.search_pages(&predicate, BATCH_LIMIT, offset).await?;
            if pages.is_empty() {
                break;
            }
            for page in &pages {
                for segment in self.repo.list_segments_for_page(&page.page_id).await? {
                    entries.push(SearchEntry {
                        source: SearchSource::Repository,
                        source_id: segment.segment_id,
                        title: page.publication_id.clone(),
                        body: segment.text,
                        date: Some(page.issue_date),
                        doc_type: segment.kind.as_str().to_string(),
                        facets: std::collections::HashMap::new(),
                    });
                }
            }
            offset += pages.len() as i64;
        }
        Ok(entries)
    }
}

#[async_trait]
impl ExternalOperations for DefaultExternalOperations {
    /// Rebuild the repository-source slice of the search index, optionally
    /// scoped to `parameters.publication_id`.
    async fn reindex(&self, task: &Task) -> Result<()> {
        let publication_id = string_param(task, "publication_id");
        let entries = self.segments_for_publication(publication_id.as_deref()).await?;
        self.search.reindex(SearchSource::Repository, entries).await?;
        Ok(())
    }

    /// Queued export is out of scope: the `export` CLI command writes
    /// directly to a file handle the queue worker has no access to.
    async fn export(&self, task: &Task) -> Result<()> {
        let _ = task;
        Err(PipelineError::Validation(
            "queued export tasks are not yet implemented; use the `export` CLI command".into(),
        ))
    }

    async fn import(&self, task: &Task) -> Result<()> {
        let _ = task;
        Err(PipelineError::Validation(
            "queued import tasks are not yet implemented; use the `import` CLI command".into(),
        ))
    }

    async fn promote(&self, task: &Task) -> Result<()> {
        let segment_id = string_param(task, "segment_id")
            .ok_or_else(|| PipelineError::Validation("promote task missing parameters.segment_id".into()))?;
        let overrides = PromoteOverrides {
            title: string_param(task, "title"),
            event_date: date_param(task, "event_date"),
            body: string_param(task, "body"),
        };
        self.connector.promote(&segment_id, Some(overrides)).await?;
        Ok(())
    }
}

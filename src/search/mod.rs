//! Secondary full-text index over both the repository store and the main
//! events store: schema plus writer/reader pair, `delete_term` before
//! re-add for upsert semantics, `IndexReader` reload after commit, over a
//! multi-source document shape with facets and fuzzy
//! matching, which the example index didn't attempt.

mod query;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tantivy::collector::TopDocs;
use tantivy::schema::{Schema, TantivyDocument, Value as _, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Term};

use crate::error::{PipelineError, Result};

pub use query::{parse_query, FuzzyMatcher, ParsedQuery};

const WRITER_HEAP_BYTES: usize = 50 * 1024 * 1024;

/// Which store a document originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    Repository,
    Main,
}

impl SearchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Main => "main",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "repository" => Some(Self::Repository),
            "main" => Some(Self::Main),
            _ => None,
        }
    }
}

/// A document to be indexed. The repository contributes pages, segments,
/// and articles; the main store contributes events. `source_id` is the
/// entity's own identifier (`page_id`, `segment_id`, `article_id`, or
/// `event_id`) — `(source, source_id)` is the index's unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEntry {
    pub source: SearchSource,
    pub source_id: String,
    pub title: String,
    pub body: String,
    pub date: Option<NaiveDate>,
    pub doc_type: String,
    pub facets: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub query: String,
    pub source: Option<SearchSource>,
    pub limit: usize,
    pub offset: usize,
    pub fuzzy: Option<u8>,
    pub facets: Vec<String>,
    pub filters: HashMap<String, String>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub source: SearchSource,
    pub source_id: String,
    pub title: String,
    pub snippet: String,
    pub score: f32,
    pub date: Option<NaiveDate>,
    pub doc_type: String,
    pub matched_fuzzy: bool,
    #[serde(skip)]
    facets: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total: usize,
    pub execution_time_ms: u64,
    pub facet_counts: HashMap<String, HashMap<String, u64>>,
}

struct SchemaFields {
    schema: Schema,
    source: tantivy::schema::Field,
    source_id: tantivy::schema::Field,
    title: tantivy::schema::Field,
    body: tantivy::schema::Field,
    date: tantivy::schema::Field,
    doc_type: tantivy::schema::Field,
    facets_json: tantivy::schema::Field,
}

fn build_schema() -> SchemaFields {
    let mut builder = Schema::builder();
    let source = builder.add_text_field("source", STRING | STORED);
    let source_id = builder.add_text_field("source_id", STRING | STORED);
    let title = builder.add_text_field("title", TEXT | STORED);
    let body = builder.add_text_field("body", TEXT | STORED);
    let date = builder.add_text_field("date", STRING | STORED);
    let doc_type = builder.add_text_field("doc_type", STRING | STORED);
    let facets_json = builder.add_text_field("facets_json", STORED);
    let schema = builder.build();
    SchemaFields {
        schema,
        source,
        source_id,
        title,
        body,
        date,
        doc_type,
        facets_json,
    }
}

/// The search index: a `tantivy` index plus a shared writer, matching the
/// example pack's one-writer-per-index convention. Index mutation runs
/// under a `std::sync::Mutex` rather than `tokio::sync::Mutex` since the
/// critical sections are pure CPU/disk work with no `.await` inside them.
pub struct SearchIndex {
    index: Index,
    writer: Arc<Mutex<IndexWriter>>,
    reader: IndexReader,
    fields: Arc<SchemaFields>,
}

impl SearchIndex {
    /// Open an existing index at `path`, or create one if the directory is
    /// empty.
    pub fn open_or_create(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let fields = build_schema();
        let index = if directory_has_index(path) {
            Index::open_in_dir(path)
                .map_err(|e| PipelineError::Internal(format!("opening search index: {e}")))?
        } else {
            Index::create_in_dir(path, fields.schema.clone())
                .map_err(|e| PipelineError::Internal(format!("creating search index: {e}")))?
        };
        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|e| PipelineError::Internal(format!("creating index writer: {e}")))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| PipelineError::Internal(format!("creating index reader: {e}")))?;
        Ok(Self {
            index,
            writer: Arc::new(Mutex::new(writer)),
            reader,
            fields: Arc::new(fields),
        })
    }

    fn unique_term(&self, source: SearchSource, source_id: &str) -> Term {
        // tantivy has no compound-key terms; encode the pair in one text
        // field so `delete_term` can target exactly one document.
        Term::from_field_text(self.fields.source_id, &format!("{}:{source_id}", source.as_str()))
    }

    /// Insert or replace a document, keyed by `(source, source_id)`.
    pub async fn index_document(&self, entry: SearchEntry) -> Result<()> {
        let fields = self.fields.clone();
        let term = self.unique_term(entry.source, &entry.source_id);
        let facets_json = serde_json::to_string(&entry.facets).unwrap_or_else(|_| "{}".into());
        let composite_id = format!("{}:{}", entry.source.as_str(), entry.source_id);
        let writer = self.writer.clone();
        tokio::task::spawn_blocking({
            move || -> Result<()> {
                let mut w = writer
                    .lock()
                    .map_err(|_| PipelineError::Internal("search index writer lock poisoned".into()))?;
                w.delete_term(term.clone());
                let document = doc!(
                    fields.source => entry.source.as_str(),
                    fields.source_id => composite_id,
                    fields.title => entry.title.as_str(),
                    fields.body => entry.body.as_str(),
                    fields.date => entry.date.map(|d| d.to_string()).unwrap_or_default(),
                    fields.doc_type => entry.doc_type.as_str(),
                    fields.facets_json => facets_json,
                );
                w.add_document(document)
                    .map_err(|e| PipelineError::Internal(format!("indexing document: {e}")))?;
                w.commit()
                    .map_err(|e| PipelineError::Internal(format!("committing search index: {e}")))?;
                Ok(())
            }
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("index task panicked: {e}")))?
    }

    pub async fn delete_document(&self, source: SearchSource, source_id: &str) -> Result<()> {
        let term = self.unique_term(source, source_id);
        let writer = self.writer.clone();
        tokio::task::spawn_blocking({
            move || -> Result<()> {
                let mut w = writer
                    .lock()
                    .map_err(|_| PipelineError::Internal("search index writer lock poisoned".into()))?;
                w.delete_term(term);
                w.commit()
                    .map_err(|e| PipelineError::Internal(format!("committing search index: {e}")))?;
                Ok(())
            }
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("index task panicked: {e}")))?
    }

    /// Full rebuild of one source: delete every document tagged with it,
    /// then bulk-reinsert `entries`. Idempotent — running it twice with the
    /// same `entries` yields the same document set and counts.
    pub async fn reindex(&self, source: SearchSource, entries: Vec<SearchEntry>) -> Result<usize> {
        let fields = self.fields.clone();
        let source_term = Term::from_field_text(self.fields.source, source.as_str());
        let count = entries.len();
        let writer = self.writer.clone();
        tokio::task::spawn_blocking({
            move || -> Result<()> {
                let mut w = writer
                    .lock()
                    .map_err(|_| PipelineError::Internal("search index writer lock poisoned".into()))?;
                w.delete_term(source_term);
                for entry in entries {
                    let facets_json =
                        serde_json::to_string(&entry.facets).unwrap_or_else(|_| "{}".into());
                    let composite_id = format!("{}:{}", entry.source.as_str(), entry.source_id);
                    let document = doc!(
                        fields.source => entry.source.as_str(),
                        fields.source_id => composite_id,
                        fields.title => entry.title.as_str(),
                        fields.body => entry.body.as_str(),
                        fields.date => entry.date.map(|d| d.to_string()).unwrap_or_default(),
                        fields.doc_type => entry.doc_type.as_str(),
                        fields.facets_json => facets_json,
                    );
                    w.add_document(document)
                        .map_err(|e| PipelineError::Internal(format!("indexing document: {e}")))?;
                }
                w.commit()
                    .map_err(|e| PipelineError::Internal(format!("committing search index: {e}")))?;
                Ok(())
            }
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("reindex task panicked: {e}")))??;
        self.reader
            .reload()
            .map_err(|e| PipelineError::Internal(format!("reloading search index: {e}")))?;
        Ok(count)
    }

    /// Run a search: whitespace tokens, `AND`/`OR`, quoted phrases (default
    /// combinator `AND`), optional fuzzy fallback, facet counts over the
    /// matched set, and a snippet per hit. Exact matches
    /// rank above fuzzy ones because fuzzy hits are only appended once the
    /// exact query is exhausted.
    pub fn search(&self, options: &SearchOptions) -> Result<SearchResponse> {
        let start = Instant::now();
        self.reader
            .reload()
            .map_err(|e| PipelineError::Internal(format!("reloading search index: {e}")))?;
        let searcher = self.reader.searcher();

        let parsed = query::parse_query(&options.query);
        let base_query = query::build_boolean_query(&self.index, &self.fields_for_query(), &parsed)?;

        // Over-fetch so post-filtering (source/date/facet filters) doesn't
        // starve the requested page.
        let fetch_limit = (options.limit + options.offset).max(1) * 4 + 64;
        let mut hits = searcher
            .search(&base_query, &TopDocs::with_limit(fetch_limit))
            .map_err(|e| PipelineError::Internal(format!("search failed: {e}")))?;

        let mut matched_fuzzy = vec![false; hits.len()];

        if let Some(threshold) = options.fuzzy {
            if hits.len() < options.limit + options.offset {
                let seen: std::collections::HashSet<_> =
                    hits.iter().map(|(_, addr)| *addr).collect();
                let fuzzy_query = query::build_fuzzy_query(&self.fields_for_query(), &parsed, threshold);
                let fuzzy_hits = searcher
                    .search(&fuzzy_query, &TopDocs::with_limit(fetch_limit))
                    .map_err(|e| PipelineError::Internal(format!("fuzzy search failed: {e}")))?;
                for (score, addr) in fuzzy_hits {
                    if !seen.contains(&addr) {
                        hits.push((score, addr));
                        matched_fuzzy.push(true);
                    }
                }
            }
        }

        let mut all_hits = Vec::with_capacity(hits.len());
        for (i, (score, addr)) in hits.into_iter().enumerate() {
            let doc: TantivyDocument = searcher
                .doc(addr)
                .map_err(|e| PipelineError::Internal(format!("doc fetch failed: {e}")))?;
            if let Some(hit) = self.doc_to_hit(&doc, score, matched_fuzzy[i], options) {
                all_hits.push(hit);
            }
        }

        let facet_counts = self.compute_facet_counts(&all_hits, &options.facets);

        let total = all_hits.len();
        let page = all_hits
            .into_iter()
            .skip(options.offset)
            .take(options.limit.max(1))
            .collect();

        Ok(SearchResponse {
            results: page,
            total,
            execution_time_ms: start.elapsed().as_millis() as u64,
            facet_counts,
        })
    }

    fn fields_for_query(&self) -> query::QueryFields {
        query::QueryFields {
            title: self.fields.title,
            body: self.fields.body,
        }
    }

    fn doc_to_hit(
        &self,
        doc: &TantivyDocument,
        score: f32,
        fuzzy: bool,
        options: &SearchOptions,
    ) -> Option<SearchHit> {
        let source_str = doc
            .get_first(self.fields.source)
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let source = SearchSource::from_str(source_str)?;
        if let Some(wanted) = options.source {
            if wanted != source {
                return None;
            }
        }
        let composite_id = doc
            .get_first(self.fields.source_id)
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let source_id = composite_id
            .split_once(':')
            .map(|(_, id)| id.to_string())
            .unwrap_or_else(|| composite_id.to_string());
        let title = doc
            .get_first(self.fields.title)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let body = doc
            .get_first(self.fields.body)
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let date_str = doc.get_first(self.fields.date).and_then(|v| v.as_str());
        let date = date_str.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());

        if let (Some(d), Some(start)) = (date, options.date_start) {
            if d < start {
                return None;
            }
        }
        if let (Some(d), Some(end)) = (date, options.date_end) {
            if d > end {
                return None;
            }
        }

        let doc_type = doc
            .get_first(self.fields.doc_type)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let facets_json = doc
            .get_first(self.fields.facets_json)
            .and_then(|v| v.as_str())
            .unwrap_or("{}");
        let facets: HashMap<String, String> = serde_json::from_str(facets_json).unwrap_or_default();

        if !options.filters.is_empty() {
            for (key, value) in &options.filters {
                if facets.get(key) != Some(value) {
                    return None;
                }
            }
        }

        let snippet = make_snippet(body, &options.query);

        Some(SearchHit {
            source,
            source_id,
            title,
            snippet,
            score,
            date,
            doc_type,
            matched_fuzzy: fuzzy,
            facets,
        })
    }

    fn compute_facet_counts(
        &self,
        hits: &[SearchHit],
        requested: &[String],
    ) -> HashMap<String, HashMap<String, u64>> {
        // Facet counts are computed over the already-matched result set
        // rather than a dedicated tantivy facet collector — the index's
        // facet fields are free-form key/value pairs per document, not a
        // fixed hierarchy, so a post-hoc tally over hits is simpler and
        // correct at the result-set sizes this pipeline expects.
        let mut counts: HashMap<String, HashMap<String, u64>> = HashMap::new();
        if requested.is_empty() {
            return counts;
        }
        for name in requested {
            counts.entry(name.clone()).or_default();
        }
        for hit in hits {
            for name in requested {
                let value = if name == "type" {
                    Some(hit.doc_type.as_str())
                } else {
                    hit.facets.get(name).map(|v| v.as_str())
                };
                if let Some(value) = value {
                    *counts
                        .entry(name.clone())
                        .or_default()
                        .entry(value.to_string())
                        .or_insert(0) += 1;
                }
            }
        }
        counts
    }
}

fn make_snippet(body: &str, query: &str) -> String {
    let tokens: Vec<&str> = query
        .split_whitespace()
        .map(|t| t.trim_matches('"'))
        .filter(|t| !t.is_empty() && *t != "AND" && *t != "OR")
        .collect();
    let lower = body.to_lowercase();
    let pos = tokens
        .iter()
        .find_map(|t| lower.find(&t.to_lowercase()))
        .unwrap_or(0);
    let start = pos.saturating_sub(40);
    let end = (pos + 120).min(body.len());
    let start = body
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| i >= start)
        .unwrap_or(0);
    let end = body
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| i >= end)
        .unwrap_or(body.len());
    let mut snippet = body[start..end].to_string();
    if start > 0 {
        snippet = format!("…{snippet}");
    }
    if end < body.len() {
        snippet.push('…');
    }
    snippet
}

fn directory_has_index(path: &Path) -> bool {
    path.join("meta.json").exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: SearchSource, id: &str, title: &str, body: &str) -> SearchEntry {
        SearchEntry {
            source,
            source_id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            date: NaiveDate::from_ymd_opt(1891, 4, 15),
            doc_type: "article".to_string(),
            facets: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn index_and_search_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index = SearchIndex::open_or_create(dir.path()).unwrap();
        index
            .index_document(entry(
                SearchSource::Repository,
                "page-1",
                "Great Fire Destroys Mill",
                "A great fire swept through the cotton mill last night",
            ))
            .await
            .unwrap();

        let response = index
            .search(&SearchOptions {
                query: "fire".to_string(),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.results[0].source_id, "page-1");
    }

    #[tokio::test]
    async fn delete_document_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let index = SearchIndex::open_or_create(dir.path()).unwrap();
        index
            .index_document(entry(SearchSource::Repository, "page-1", "Title", "body text"))
            .await
            .unwrap();
        index
            .delete_document(SearchSource::Repository, "page-1")
            .await
            .unwrap();

        let response = index
            .search(&SearchOptions {
                query: "body".to_string(),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.total, 0);
    }

    #[tokio::test]
    async fn reindex_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let index = SearchIndex::open_or_create(dir.path()).unwrap();
        let entries = vec![
            entry(SearchSource::Repository, "page-1", "Storm", "a storm hit the coast"),
            entry(SearchSource::Repository, "page-2", "Harvest", "the harvest was plentiful"),
        ];
        index.reindex(SearchSource::Repository, entries.clone()).await.unwrap();
        let first = index
            .search(&SearchOptions { query: "storm OR harvest".to_string(), limit: 10, ..Default::default() })
            .unwrap();
        index.reindex(SearchSource::Repository, entries).await.unwrap();
        let second = index
            .search(&SearchOptions { query: "storm OR harvest".to_string(), limit: 10, ..Default::default() })
            .unwrap();
        assert_eq!(first.total, second.total);
        assert_eq!(first.total, 2);
    }

    #[tokio::test]
    async fn source_filter_excludes_other_sources() {
        let dir = tempfile::tempdir().unwrap();
        let index = SearchIndex::open_or_create(dir.path()).unwrap();
        index
            .index_document(entry(SearchSource::Repository, "page-1", "Flood", "a flood of news"))
            .await
            .unwrap();
        index
            .index_document(entry(SearchSource::Main, "event-1", "Flood event", "a flood of news"))
            .await
            .unwrap();

        let response = index
            .search(&SearchOptions {
                query: "flood".to_string(),
                source: Some(SearchSource::Main),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.results[0].source_id, "event-1");
    }

    #[tokio::test]
    async fn fuzzy_search_finds_misspelled_token() {
        let dir = tempfile::tempdir().unwrap();
        let index = SearchIndex::open_or_create(dir.path()).unwrap();
        index
            .index_document(entry(
                SearchSource::Repository,
                "page-1",
                "Election Results",
                "the candidate won the election by a wide margin",
            ))
            .await
            .unwrap();

        let response = index
            .search(&SearchOptions {
                query: "electon".to_string(),
                fuzzy: Some(70),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.total, 1);
        assert!(response.results[0].matched_fuzzy);
    }
}

//! Earliest-issue-date resolution: an ordered strategy chain (cache →
//! bundled static dataset → archive JSON endpoint → HTML scrape), each a
//! small independently-testable function.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

use super::static_dataset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Cache,
    StaticDataset,
    JsonEndpoint,
    HtmlScrape,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::StaticDataset => "static_dataset",
            Self::JsonEndpoint => "json_endpoint",
            Self::HtmlScrape => "html_scrape",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EarliestDateResolution {
    pub date: NaiveDate,
    pub source: ResolutionSource,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct PersistedCache {
    entries: HashMap<String, NaiveDate>,
}

/// In-memory cache of resolved earliest dates, optionally persisted to a
/// JSON file so repeated CLI invocations don't re-hit the archive.
pub struct EarliestDateCache {
    entries: Arc<RwLock<HashMap<String, NaiveDate>>>,
    persist_path: Option<PathBuf>,
}

impl EarliestDateCache {
    pub fn new(persist_path: Option<PathBuf>) -> Self {
        let loaded = persist_path
            .as_deref()
            .and_then(|p| Self::load_from_disk(p).ok())
            .unwrap_or_default();
        Self {
            entries: Arc::new(RwLock::new(loaded.entries)),
            persist_path,
        }
    }

    fn load_from_disk(path: &Path) -> Result<PersistedCache> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Internal(format!("parsing earliest-date cache: {e}")))
    }

    async fn persist(&self) {
        let Some(path) = &self.persist_path else { return };
        let entries = self.entries.read().await.clone();
        let snapshot = PersistedCache { entries };
        if let Ok(json) = serde_json::to_vec_pretty(&snapshot) {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let _ = std::fs::write(path, json);
        }
    }

    pub async fn get(&self, lccn: &str) -> Option<NaiveDate> {
        self.entries.read().await.get(lccn).copied()
    }

    pub async fn put(&self, lccn: &str, date: NaiveDate) {
        self.entries.write().await.insert(lccn.to_string(), date);
        self.persist().await;
    }
}

/// Parse a per-publication JSON endpoint response body
/// (`/lccn/<lccn>.json`), pulling the earliest issue date from whichever of
/// `start_year`/`issues` fields are present.
pub fn parse_publication_json(body: &str) -> Option<NaiveDate> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    if let Some(issues) = value.get("issues").and_then(|v| v.as_array()) {
        return issues
            .iter()
            .filter_map(|issue| issue.get("date_issued").and_then(|d| d.as_str()))
            .filter_map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .min();
    }
    if let Some(year) = value.get("start_year").and_then(|v| v.as_str()) {
        let year: i32 = year.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    None
}

/// Scrape the publication's HTML listing page for the earliest displayed
/// issue date, used only when the JSON endpoint is unavailable.
pub fn scrape_html_for_earliest_date(html: &str) -> Option<NaiveDate> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("time, .issue-date, a.issue").ok()?;
    document
        .select(&selector)
        .filter_map(|el| {
            let text = el.text().collect::<String>();
            let text = text.trim();
            NaiveDate::parse_from_str(text, "%B %d, %Y")
                .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
                .ok()
        })
        .min()
}

/// Run the resolution chain for `lccn`, given already-fetched (or absent)
/// JSON-endpoint and HTML-scrape bodies. Callers are responsible for the
/// network fetch (via the rate-limited HTTP client) so this function stays
/// pure and unit-testable; `ArchiveClient::earliest_issue_date` wires the
/// fetch in.
pub async fn resolve(
    cache: &EarliestDateCache,
    lccn: &str,
    json_body: impl FnOnce() -> Option<String>,
    html_body: impl FnOnce() -> Option<String>,
) -> Option<EarliestDateResolution> {
    if let Some(date) = cache.get(lccn).await {
        debug!("earliest_issue_date({lccn}): cache hit");
        return Some(EarliestDateResolution {
            date,
            source: ResolutionSource::Cache,
        });
    }

    if let Some(date) = static_dataset::lookup(lccn) {
        cache.put(lccn, date).await;
        debug!("earliest_issue_date({lccn}): static dataset hit");
        return Some(EarliestDateResolution {
            date,
            source: ResolutionSource::StaticDataset,
        });
    }

    if let Some(body) = json_body() {
        if let Some(date) = parse_publication_json(&body) {
            cache.put(lccn, date).await;
            info!("earliest_issue_date({lccn}): resolved via JSON endpoint");
            return Some(EarliestDateResolution {
                date,
                source: ResolutionSource::JsonEndpoint,
            });
        }
    }

    if let Some(body) = html_body() {
        if let Some(date) = scrape_html_for_earliest_date(&body) {
            cache.put(lccn, date).await;
            info!("earliest_issue_date({lccn}): resolved via HTML scrape");
            return Some(EarliestDateResolution {
                date,
                source: ResolutionSource::HtmlScrape,
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_hit_short_circuits_other_strategies() {
        let cache = EarliestDateCache::new(None);
        cache
            .put("sn00000001", NaiveDate::from_ymd_opt(1900, 1, 1).unwrap())
            .await;
        let result = resolve(
            &cache,
            "sn00000001",
            || panic!("json strategy should not run"),
            || panic!("html strategy should not run"),
        )
        .await
        .unwrap();
        assert_eq!(result.source, ResolutionSource::Cache);
    }

    #[tokio::test]
    async fn static_dataset_wins_over_json_endpoint() {
        let cache = EarliestDateCache::new(None);
        let result = resolve(&cache, "sn83045604", || None, || None).await.unwrap();
        assert_eq!(result.source, ResolutionSource::StaticDataset);
        assert_eq!(result.date, NaiveDate::from_ymd_opt(1888, 5, 11).unwrap());
    }

    #[tokio::test]
    async fn falls_through_to_json_endpoint() {
        let cache = EarliestDateCache::new(None);
        let json = r#"{"issues":[{"date_issued":"1901-03-04"},{"date_issued":"1900-01-01"}]}"#;
        let result = resolve(&cache, "sn_unknown", || Some(json.to_string()), || None)
            .await
            .unwrap();
        assert_eq!(result.source, ResolutionSource::JsonEndpoint);
        assert_eq!(result.date, NaiveDate::from_ymd_opt(1900, 1, 1).unwrap());
    }

    #[tokio::test]
    async fn falls_through_to_html_scrape() {
        let cache = EarliestDateCache::new(None);
        let html = "<html><body><time>January 07, 1900</time></body></html>";
        let result = resolve(&cache, "sn_unknown2", || None, || Some(html.to_string()))
            .await
            .unwrap();
        assert_eq!(result.source, ResolutionSource::HtmlScrape);
        assert_eq!(result.date, NaiveDate::from_ymd_opt(1900, 1, 7).unwrap());
    }

    #[test]
    fn parses_start_year_fallback() {
        let json = r#"{"start_year":"1877"}"#;
        assert_eq!(
            parse_publication_json(json),
            NaiveDate::from_ymd_opt(1877, 1, 1)
        );
    }

    #[tokio::test]
    async fn cache_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("earliest_date_cache.json");
        let cache = EarliestDateCache::new(Some(path.clone()));
        cache
            .put("sn_persist", NaiveDate::from_ymd_opt(1905, 6, 6).unwrap())
            .await;

        let reloaded = EarliestDateCache::new(Some(path));
        assert_eq!(
            reloaded.get("sn_persist").await,
            Some(NaiveDate::from_ymd_opt(1905, 6, 6).unwrap())
        );
    }
}

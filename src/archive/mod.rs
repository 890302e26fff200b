//! Acquisition client for Chronicling America: a rate-limited, retrying
//! HTTP client wrapping the search-strategy chain, multi-format download,
//! and earliest-issue-date resolution. Pairs a shared `reqwest::Client`
//! with a shared rate limiter across every request it issues.

pub mod backoff;
pub mod download;
pub mod earliest_date;
pub mod rate_limiter;
pub mod search;
pub mod static_dataset;
pub mod types;

use std::path::PathBuf;
use std::time::Duration;

use chrono::Datelike;
use reqwest::Client;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

use backoff::{retry_with_backoff, RetryableError};
use earliest_date::{EarliestDateCache, EarliestDateResolution};
use rate_limiter::RateLimiter;
use search::Strategy;
use types::{
    DateAdjustment, DownloadFormat, DownloadManifest, RawSearchResponse, SearchQuery, SearchResponse,
};

const DEFAULT_BASE_URL: &str = "https://chroniclingamerica.loc.gov";

/// Configuration consumed by `ArchiveClient::new`.
#[derive(Debug, Clone)]
pub struct ArchiveClientConfig {
    pub base_url: String,
    pub rate_limit_per_sec: f64,
    pub earliest_date_cache_path: Option<PathBuf>,
    pub request_timeout: Duration,
    /// `downloader.retry_attempts`; caps every retry loop this client runs.
    pub max_attempts: u32,
}

impl Default for ArchiveClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            rate_limit_per_sec: 2.0,
            earliest_date_cache_path: None,
            request_timeout: Duration::from_secs(30),
            max_attempts: backoff::MAX_ATTEMPTS,
        }
    }
}

/// A rate-limited, retrying client for the Chronicling America archive.
pub struct ArchiveClient {
    http: Client,
    base_url: String,
    limiter: RateLimiter,
    earliest_date_cache: EarliestDateCache,
    max_attempts: u32,
}

impl ArchiveClient {
    pub fn new(config: ArchiveClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PipelineError::Internal(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url,
            limiter: RateLimiter::new(config.rate_limit_per_sec),
            earliest_date_cache: EarliestDateCache::new(config.earliest_date_cache_path),
            max_attempts: config.max_attempts,
        })
    }

    async fn get_text(&self, url: &str) -> std::result::Result<String, RetryableError> {
        self.limiter.acquire(url).await;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RetryableError::Retryable {
                message: e.to_string(),
                retry_after: None,
            })?;
        let status = response.status().as_u16();
        if status != 200 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(RetryableError::from_status(
                status,
                format!("HTTP {status} fetching {url}"),
                retry_after,
            ));
        }
        response
            .text()
            .await
            .map_err(|e| RetryableError::NonRetryable(e.to_string()))
    }

    /// Run the search-strategy chain: advanced search first, falling back
    /// to per-day / year-month / year-only URLs if advanced search errors
    /// out. Pruning `date_start` against the publication's resolved
    /// earliest-issue date happens before any request is made.
    pub async fn search(&self, mut query: SearchQuery) -> Result<SearchResponse> {
        let adjustment = if let (Some(pub_id), Some(start)) =
            (query.publication_id.clone(), query.date_start)
        {
            match self.earliest_issue_date(&pub_id).await {
                Ok(resolution) if resolution.date > start => {
                    query.date_start = Some(resolution.date);
                    Some(DateAdjustment {
                        original: start,
                        adjusted: resolution.date,
                    })
                }
                _ => None,
            }
        } else {
            None
        };

        let advanced_url = search::advanced_search_url(&self.base_url, &query);
        match retry_with_backoff(self.max_attempts, |_attempt| {
            let url = advanced_url.clone();
            async move { self.get_text(&url).await }
        })
        .await
        {
            Ok(body) => {
                let raw: RawSearchResponse = serde_json::from_str(&body)
                    .map_err(|e| PipelineError::CorruptData(format!("advanced search response: {e}")))?;
                let (pages, pagination) = search::parse_and_filter(&raw, &query, Strategy::AdvancedSearch);
                return Ok(SearchResponse {
                    pages,
                    pagination,
                    adjustment,
                    strategy_used: Strategy::AdvancedSearch.as_str(),
                });
            }
            Err(e) => {
                warn!("advanced search failed ({e}), falling back");
            }
        }

        self.search_via_fallback(query, adjustment).await
    }

    async fn search_via_fallback(
        &self,
        query: SearchQuery,
        adjustment: Option<DateAdjustment>,
    ) -> Result<SearchResponse> {
        let strategy = search::choose_fallback(&query);
        let url = match strategy {
            Strategy::PerDay => {
                let pub_id = query
                    .publication_id
                    .clone()
                    .ok_or_else(|| PipelineError::Validation("per-day search requires publication_id".into()))?;
                let day = query
                    .date_start
                    .ok_or_else(|| PipelineError::Validation("per-day search requires date_start".into()))?;
                search::per_day_url(&self.base_url, &pub_id, day)
            }
            Strategy::YearMonth => {
                let start = query
                    .date_start
                    .ok_or_else(|| PipelineError::Validation("year-month search requires date_start".into()))?;
                search::year_month_url(&self.base_url, &query, start.year(), start.month())
            }
            Strategy::YearOnly => {
                let year = query
                    .date_start
                    .map(|d| d.year())
                    .unwrap_or_else(|| chrono::Utc::now().year());
                search::year_only_url(&self.base_url, &query, year)
            }
            Strategy::AdvancedSearch => unreachable!("fallback never selects AdvancedSearch"),
        };

        let body = retry_with_backoff(self.max_attempts, |_attempt| {
            let url = url.clone();
            async move { self.get_text(&url).await }
        })
        .await?;
        let raw: RawSearchResponse = serde_json::from_str(&body)
            .map_err(|e| PipelineError::CorruptData(format!("fallback search response: {e}")))?;
        let (pages, pagination) = search::parse_and_filter(&raw, &query, strategy);
        Ok(SearchResponse {
            pages,
            pagination,
            adjustment,
            strategy_used: strategy.as_str(),
        })
    }

    /// Resolve the earliest issue date known for `lccn`, via the cache →
    /// static dataset → JSON endpoint → HTML scrape chain.
    pub async fn earliest_issue_date(&self, lccn: &str) -> Result<EarliestDateResolution> {
        if let Some(date) = self.earliest_date_cache.get(lccn).await {
            return Ok(EarliestDateResolution {
                date,
                source: earliest_date::ResolutionSource::Cache,
            });
        }
        if let Some(date) = static_dataset::lookup(lccn) {
            self.earliest_date_cache.put(lccn, date).await;
            return Ok(EarliestDateResolution {
                date,
                source: earliest_date::ResolutionSource::StaticDataset,
            });
        }

        let json_url = format!("{}/lccn/{}.json", self.base_url.trim_end_matches('/'), lccn);
        let json_body = self.get_text(&json_url).await.ok();
        if let Some(date) = json_body.as_deref().and_then(earliest_date::parse_publication_json) {
            self.earliest_date_cache.put(lccn, date).await;
            return Ok(EarliestDateResolution {
                date,
                source: earliest_date::ResolutionSource::JsonEndpoint,
            });
        }

        let html_url = format!("{}/lccn/{}/issues/", self.base_url.trim_end_matches('/'), lccn);
        let html_body = self.get_text(&html_url).await.ok();
        if let Some(date) = html_body
            .as_deref()
            .and_then(earliest_date::scrape_html_for_earliest_date)
        {
            self.earliest_date_cache.put(lccn, date).await;
            return Ok(EarliestDateResolution {
                date,
                source: earliest_date::ResolutionSource::HtmlScrape,
            });
        }

        Err(PipelineError::NotFound(format!(
            "could not resolve earliest issue date for {lccn}"
        )))
    }

    /// Download whichever formats are requested for a page, skipping any
    /// that individually fail.
    pub async fn download(&self, page: &crate::models::PageMetadata, formats: &[DownloadFormat]) -> DownloadManifest {
        let mut results = Vec::with_capacity(formats.len());
        for &format in formats {
            let url = download::format_url(&self.base_url, page, format);
            let outcome = retry_with_backoff(self.max_attempts, |_attempt| {
                let url = url.clone();
                async move {
                    self.limiter.acquire(&url).await;
                    let response = self
                        .http
                        .get(&url)
                        .send()
                        .await
                        .map_err(|e| RetryableError::Retryable {
                            message: e.to_string(),
                            retry_after: None,
                        })?;
                    let status = response.status().as_u16();
                    if status != 200 {
                        return Err(RetryableError::from_status(status, format!("HTTP {status}"), None));
                    }
                    let content_type = response
                        .headers()
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.to_string());
                    let bytes = response
                        .bytes()
                        .await
                        .map_err(|e| RetryableError::NonRetryable(e.to_string()))?;
                    Ok((bytes.to_vec(), content_type, url.clone()))
                }
            })
            .await;
            results.push((format, outcome));
        }
        info!(
            "downloaded {}/{} requested formats for {}/{}",
            results.iter().filter(|(_, r)| r.is_ok()).count(),
            formats.len(),
            page.publication_id,
            page.issue_date
        );
        download::assemble_manifest(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_chronicling_america_and_two_per_second() {
        let config = ArchiveClientConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.rate_limit_per_sec, 2.0);
    }
}

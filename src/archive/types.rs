//! Request/response shapes for the archive client, kept separate from
//! `crate::models` since these describe the wire contract with Chronicling
//! America rather than repository-store domain entities.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::PageMetadata;

/// Parameters accepted by `ArchiveClient::search`.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub keywords: Option<String>,
    pub publication_id: Option<String>,
    pub state: Option<String>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub page_index: u32,
    pub page_size: u32,
}

/// Pagination summary returned alongside a page of results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PaginationSummary {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_items: u64,
}

/// The date-range adjustment surfaced to the caller when a `date_start` is
/// pruned against a publication's resolved earliest-issue date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DateAdjustment {
    pub original: NaiveDate,
    pub adjusted: NaiveDate,
}

/// Result of a `search` call.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub pages: Vec<PageMetadata>,
    pub pagination: PaginationSummary,
    pub adjustment: Option<DateAdjustment>,
    pub strategy_used: &'static str,
}

/// A requested download format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadFormat {
    Pdf,
    Jp2,
    OcrText,
    Json,
}

impl DownloadFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Jp2 => "jp2",
            Self::OcrText => "txt",
            Self::Json => "json",
        }
    }
}

/// Bytes downloaded for one format, plus a content manifest entry.
#[derive(Debug, Clone)]
pub struct DownloadedFormat {
    pub format: DownloadFormat,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub url: String,
}

/// The full result of a `download` call: one entry per requested format that
/// was actually retrieved.
#[derive(Debug, Clone, Default)]
pub struct DownloadManifest {
    pub formats: Vec<DownloadedFormat>,
}

/// Raw shape of a single hit in the Chronicling America `/search/pages/results/`
/// JSON response, trimmed to the fields this client consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSearchItem {
    pub id: Option<String>,
    pub lccn: Option<String>,
    pub date: Option<String>,
    pub sequence: Option<i32>,
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSearchResponse {
    #[serde(default)]
    pub items: Vec<RawSearchItem>,
    #[serde(rename = "totalItems", default)]
    pub total_items: u64,
    #[serde(rename = "endIndex", default)]
    pub end_index: u64,
}

//! The search strategy chain: advanced-search date-range URL construction,
//! falling back to per-day direct URLs, then year+month keyword search,
//! then a bare year filter.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};

use crate::models::PageMetadata;

use super::types::{PaginationSummary, RawSearchItem, RawSearchResponse, SearchQuery};

pub const MAX_DIRECT_RANGE_DAYS: i64 = 730;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    AdvancedSearch,
    PerDay,
    YearMonth,
    YearOnly,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdvancedSearch => "advanced_search",
            Self::PerDay => "per_day",
            Self::YearMonth => "year_month",
            Self::YearOnly => "year_only",
        }
    }
}

/// Pick the strategy to use for a given (possibly open-ended) date range.
/// Advanced search is always tried first; the others exist for when the
/// advanced-search endpoint itself is unreachable or returns an error.
pub fn choose_fallback(query: &SearchQuery) -> Strategy {
    match (query.date_start, query.date_end) {
        (Some(start), Some(end)) if (end - start).num_days() <= MAX_DIRECT_RANGE_DAYS => {
            Strategy::PerDay
        }
        (Some(start), Some(end)) if start.year() == end.year() => Strategy::YearMonth,
        _ => Strategy::YearOnly,
    }
}

/// Build the advanced-search URL, formatting dates as `MM/DD/YYYY` per the
/// archive's advanced-search form encoding.
pub fn advanced_search_url(base_url: &str, query: &SearchQuery) -> String {
    let mut params: Vec<(String, String)> = vec![
        ("format".into(), "json".into()),
        ("rows".into(), query.page_size.max(1).to_string()),
        (
            "page".into(),
            (query.page_index + 1).to_string(),
        ),
    ];
    if let Some(kw) = &query.keywords {
        params.push(("andtext".into(), kw.clone()));
    }
    if let Some(pub_id) = &query.publication_id {
        params.push(("lccn".into(), pub_id.clone()));
    }
    if let Some(state) = &query.state {
        params.push(("state".into(), state.clone()));
    }
    if let Some(d) = query.date_start {
        params.push(("date1".into(), d.format("%m/%d/%Y").to_string()));
    }
    if let Some(d) = query.date_end {
        params.push(("date2".into(), d.format("%m/%d/%Y").to_string()));
    }
    params.push(("dateFilterType".into(), "range".into()));
    params.push(("searchType".into(), "advanced".into()));
    build_url(base_url, "/search/pages/results/", &params)
}

/// Build one direct per-day URL for strategy 2 (only viable when the range
/// is bounded to `MAX_DIRECT_RANGE_DAYS`).
pub fn per_day_url(base_url: &str, publication_id: &str, day: NaiveDate) -> String {
    format!(
        "{}/lccn/{}/{}/ed-1.json",
        base_url.trim_end_matches('/'),
        publication_id,
        day.format("%Y-%m-%d")
    )
}

/// Build the year+month keyword-search fallback URL (strategy 3).
pub fn year_month_url(base_url: &str, query: &SearchQuery, year: i32, month: u32) -> String {
    let mut params: Vec<(String, String)> = vec![
        ("format".into(), "json".into()),
        ("rows".into(), query.page_size.max(1).to_string()),
        ("year".into(), year.to_string()),
        ("month".into(), month.to_string()),
    ];
    if let Some(kw) = &query.keywords {
        params.push(("andtext".into(), kw.clone()));
    }
    if let Some(pub_id) = &query.publication_id {
        params.push(("lccn".into(), pub_id.clone()));
    }
    build_url(base_url, "/search/pages/results/", &params)
}

/// Build the bare year-filter fallback URL (strategy 4, the broadest and
/// least precise).
pub fn year_only_url(base_url: &str, query: &SearchQuery, year: i32) -> String {
    let mut params: Vec<(String, String)> = vec![
        ("format".into(), "json".into()),
        ("rows".into(), query.page_size.max(1).to_string()),
        ("year".into(), year.to_string()),
    ];
    if let Some(kw) = &query.keywords {
        params.push(("andtext".into(), kw.clone()));
    }
    build_url(base_url, "/search/pages/results/", &params)
}

fn build_url(base_url: &str, path: &str, params: &[(String, String)]) -> String {
    let query_string = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}{path}?{query_string}", base_url.trim_end_matches('/'))
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Parse a raw archive JSON response into domain `PageMetadata`, applying
/// client-side date-range filtering for the fallback strategies (which may
/// return a coarser range than requested).
pub fn parse_and_filter(
    raw: &RawSearchResponse,
    query: &SearchQuery,
    strategy: Strategy,
) -> (Vec<PageMetadata>, PaginationSummary) {
    let needs_filter = !matches!(strategy, Strategy::AdvancedSearch);
    let pages = raw
        .items
        .iter()
        .filter_map(|item| to_page_metadata(item))
        .filter(|page| {
            if !needs_filter {
                return true;
            }
            in_range(page.issue_date, query.date_start, query.date_end)
        })
        .collect::<Vec<_>>();

    let page_size = query.page_size.max(1) as u64;
    let total_pages = if raw.total_items == 0 {
        1
    } else {
        raw.total_items.div_ceil(page_size)
    };
    let pagination = PaginationSummary {
        current_page: query.page_index + 1,
        total_pages: total_pages.max(1) as u32,
        total_items: raw.total_items,
    };
    (pages, pagination)
}

fn in_range(date: NaiveDate, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    if let Some(s) = start {
        if date < s {
            return false;
        }
    }
    if let Some(e) = end {
        if date > e {
            return false;
        }
    }
    true
}

fn to_page_metadata(item: &RawSearchItem) -> Option<PageMetadata> {
    let lccn = item.lccn.clone()?;
    let date = item
        .date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok())?;
    Some(PageMetadata {
        publication_id: lccn,
        issue_date: date,
        sequence: item.sequence.unwrap_or(1),
        source_system: "chronicling_america".to_string(),
        title: item.title.clone(),
        raw: item
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<HashMap<_, _>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(start: &str, end: &str) -> SearchQuery {
        SearchQuery {
            publication_id: Some("sn83045604".to_string()),
            date_start: Some(NaiveDate::parse_from_str(start, "%Y-%m-%d").unwrap()),
            date_end: Some(NaiveDate::parse_from_str(end, "%Y-%m-%d").unwrap()),
            page_index: 0,
            page_size: 20,
            ..Default::default()
        }
    }

    #[test]
    fn advanced_search_url_formats_dates_as_mm_dd_yyyy() {
        let q = query("1888-05-11", "1888-12-31");
        let url = advanced_search_url("https://chroniclingamerica.loc.gov", &q);
        assert!(url.contains("date1=05%2F11%2F1888"));
        assert!(url.contains("date2=12%2F31%2F1888"));
        assert!(url.contains("lccn=sn83045604"));
        assert!(url.contains("dateFilterType=range"));
        assert!(url.contains("searchType=advanced"));
    }

    #[test]
    fn short_range_prefers_per_day_strategy() {
        let q = query("1900-01-01", "1900-06-01");
        assert_eq!(choose_fallback(&q), Strategy::PerDay);
    }

    #[test]
    fn same_year_long_range_falls_to_year_month() {
        let q = query("1900-01-01", "1900-12-31");
        assert_eq!(choose_fallback(&q), Strategy::YearMonth);
    }

    #[test]
    fn multi_year_range_falls_to_year_only() {
        let q = query("1800-01-01", "1888-12-31");
        assert_eq!(choose_fallback(&q), Strategy::YearOnly);
    }

    #[test]
    fn fallback_strategies_filter_out_of_range_results_client_side() {
        let q = query("1900-03-01", "1900-03-31");
        let raw = RawSearchResponse {
            items: vec![
                RawSearchItem {
                    id: Some("1".into()),
                    lccn: Some("sn83045604".into()),
                    date: Some("19000215".into()),
                    sequence: Some(1),
                    title: None,
                    extra: HashMap::new(),
                },
                RawSearchItem {
                    id: Some("2".into()),
                    lccn: Some("sn83045604".into()),
                    date: Some("19000310".into()),
                    sequence: Some(1),
                    title: None,
                    extra: HashMap::new(),
                },
            ],
            total_items: 2,
            end_index: 2,
        };
        let (pages, _) = parse_and_filter(&raw, &q, Strategy::YearMonth);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].issue_date, NaiveDate::from_ymd_opt(1900, 3, 10).unwrap());
    }

    #[test]
    fn advanced_search_strategy_skips_client_side_filter() {
        let q = query("1900-03-01", "1900-03-31");
        let raw = RawSearchResponse {
            items: vec![RawSearchItem {
                id: Some("1".into()),
                lccn: Some("sn83045604".into()),
                date: Some("19000215".into()),
                sequence: Some(1),
                title: None,
                extra: HashMap::new(),
            }],
            total_items: 1,
            end_index: 1,
        };
        let (pages, _) = parse_and_filter(&raw, &q, Strategy::AdvancedSearch);
        assert_eq!(pages.len(), 1);
    }
}

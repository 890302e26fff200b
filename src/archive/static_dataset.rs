//! Bundled static dataset of well-known publications' earliest-issue dates,
//! consulted as the second link in the earliest-issue-date resolution
//! chain — a small, compiled-in table rather than a network round trip for
//! the handful of publications most commonly queried.

use chrono::NaiveDate;

/// `(lccn, earliest_issue_date)` pairs for well-known Chronicling America
/// publications. Not exhaustive; publications absent here fall through to
/// the JSON-endpoint and HTML-scrape strategies.
const WELL_KNOWN: &[(&str, &str)] = &[
    ("sn83045604", "1888-05-11"), // Evening star (Washington, D.C.)
    ("sn84026749", "1900-01-07"), // The San Francisco call
    ("sn83030214", "1860-01-03"), // The daily dispatch (Richmond, Va.)
    ("sn83025121", "1865-01-02"), // The New York herald
];

/// Look up a publication's earliest issue date in the bundled dataset.
pub fn lookup(lccn: &str) -> Option<NaiveDate> {
    WELL_KNOWN
        .iter()
        .find(|(k, _)| *k == lccn)
        .and_then(|(_, d)| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_bundled_publication() {
        assert_eq!(
            lookup("sn83045604"),
            Some(NaiveDate::from_ymd_opt(1888, 5, 11).unwrap())
        );
    }

    #[test]
    fn unknown_lccn_returns_none() {
        assert_eq!(lookup("sn99999999"), None);
    }
}

//! Query parsing and fuzzy-query construction for the search index.
//! Whitespace-separated tokens, `AND`/`OR`, and double-quoted phrases;
//! default combinator is `AND`.

use tantivy::query::{BooleanQuery, FuzzyTermQuery, Occur, Query};
use tantivy::schema::Field;
use tantivy::{Index, Term};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub terms: Vec<String>,
    pub phrases: Vec<String>,
    pub combinator: Combinator,
}

#[derive(Debug, Clone, Copy)]
pub struct QueryFields {
    pub title: Field,
    pub body: Field,
}

/// Split a raw query string into bare terms, quoted phrases, and the
/// combinator (`AND` unless an explicit top-level `OR` is present).
pub fn parse_query(raw: &str) -> ParsedQuery {
    let mut terms = Vec::new();
    let mut phrases = Vec::new();
    let mut combinator = Combinator::And;

    let mut chars = raw.chars().peekable();
    let mut buf = String::new();
    let mut in_quotes = false;

    let flush = |buf: &mut String, terms: &mut Vec<String>, phrases: &mut Vec<String>, quoted: bool| {
        if buf.is_empty() {
            return;
        }
        let word = std::mem::take(buf);
        match word.as_str() {
            "AND" => {}
            "OR" => {}
            _ if quoted => phrases.push(word),
            _ => terms.push(word),
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes {
                    flush(&mut buf, &mut terms, &mut phrases, true);
                    in_quotes = false;
                } else {
                    flush(&mut buf, &mut terms, &mut phrases, false);
                    in_quotes = true;
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if buf == "OR" {
                    combinator = Combinator::Or;
                    buf.clear();
                } else {
                    flush(&mut buf, &mut terms, &mut phrases, false);
                }
            }
            _ => buf.push(c),
        }
    }
    if buf == "OR" {
        combinator = Combinator::Or;
    } else {
        flush(&mut buf, &mut terms, &mut phrases, in_quotes);
    }

    ParsedQuery {
        terms,
        phrases,
        combinator,
    }
}

/// Build the exact-match boolean query over title/body, phrases matched as
/// exact substrings of the body, honoring the parsed combinator.
pub fn build_boolean_query(
    index: &Index,
    fields: &QueryFields,
    parsed: &ParsedQuery,
) -> Result<Box<dyn Query>> {
    use tantivy::query::QueryParser;

    let mut parser = QueryParser::for_index(index, vec![fields.title, fields.body]);
    parser.set_field_boost(fields.title, 2.0);
    if parsed.combinator == Combinator::And {
        parser.set_conjunction_by_default();
    }

    let mut pieces: Vec<String> = parsed.terms.clone();
    pieces.extend(parsed.phrases.iter().map(|p| format!("\"{p}\"")));
    let query_str = if pieces.is_empty() {
        "*".to_string()
    } else {
        pieces.join(if parsed.combinator == Combinator::Or { " OR " } else { " AND " })
    };

    parser
        .parse_query(&query_str)
        .map_err(|e| PipelineError::Validation(format!("bad search query {:?}: {e}", query_str)))
}

/// Maps a 0-100 similarity threshold to a Levenshtein edit distance:
/// higher thresholds tolerate fewer edits. 90+ requires an exact match
/// (distance 0), 70-89 allows one edit, below 70 allows two.
pub fn distance_for_threshold(threshold: u8) -> u8 {
    if threshold >= 90 {
        0
    } else if threshold >= 70 {
        1
    } else {
        2
    }
}

/// Build a fuzzy fallback query: each bare term becomes a `FuzzyTermQuery`
/// against title and body, `Occur::Should`-combined so any token match
/// counts, at the edit distance implied by `threshold`.
pub fn build_fuzzy_query(fields: &QueryFields, parsed: &ParsedQuery, threshold: u8) -> Box<dyn Query> {
    let distance = distance_for_threshold(threshold);
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
    for term_text in parsed.terms.iter().chain(parsed.phrases.iter()) {
        for field in [fields.title, fields.body] {
            let term = Term::from_field_text(field, &term_text.to_lowercase());
            clauses.push((
                Occur::Should,
                Box::new(FuzzyTermQuery::new(term, distance, true)),
            ));
        }
    }
    Box::new(BooleanQuery::new(clauses))
}

/// Token-level fuzzy matcher shared with the cross-DB connector's
/// duplicate detection (`strsim`-based Jaro-Winkler similarity scaled to
/// 0-100, matching the search index's 0-100 threshold convention).
pub struct FuzzyMatcher;

impl FuzzyMatcher {
    pub fn similarity(a: &str, b: &str) -> u8 {
        (strsim::jaro_winkler(&a.to_lowercase(), &b.to_lowercase()) * 100.0).round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_combinator_is_and() {
        let parsed = parse_query("fire mill");
        assert_eq!(parsed.combinator, Combinator::And);
        assert_eq!(parsed.terms, vec!["fire", "mill"]);
    }

    #[test]
    fn explicit_or_switches_combinator() {
        let parsed = parse_query("fire OR flood");
        assert_eq!(parsed.combinator, Combinator::Or);
        assert_eq!(parsed.terms, vec!["fire", "flood"]);
    }

    #[test]
    fn quoted_phrase_is_kept_intact() {
        let parsed = parse_query(r#""great fire" mill"#);
        assert_eq!(parsed.phrases, vec!["great fire"]);
        assert_eq!(parsed.terms, vec!["mill"]);
    }

    #[test]
    fn threshold_bands_map_to_edit_distance() {
        assert_eq!(distance_for_threshold(95), 0);
        assert_eq!(distance_for_threshold(75), 1);
        assert_eq!(distance_for_threshold(40), 2);
    }
}

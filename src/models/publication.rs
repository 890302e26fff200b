use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A newspaper publication identified by an archive-assigned control number
/// (LCCN-shaped string, e.g. `sn83045604`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    /// Archive-assigned control number. Primary key.
    pub lccn: String,
    pub title: String,
    pub place: Option<String>,
    pub first_issue_date: Option<NaiveDate>,
    pub last_issue_date: Option<NaiveDate>,
}

impl Publication {
    pub fn new(lccn: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            lccn: lccn.into(),
            title: title.into(),
            place: None,
            first_issue_date: None,
            last_issue_date: None,
        }
    }
}

/// A valid LCCN is lowercase alphanumeric, starting with 2-3 letters
/// followed by 8 digits (the Chronicling America convention, e.g.
/// `sn83045604`). Validated at every boundary that accepts a raw string.
pub fn is_valid_lccn(s: &str) -> bool {
    let letters = s.chars().take_while(|c| c.is_ascii_lowercase()).count();
    if !(2..=3).contains(&letters) {
        return false;
    }
    let digits = &s[letters..];
    digits.len() == 8 && digits.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_known_lccn() {
        assert!(is_valid_lccn("sn83045604"));
        assert!(is_valid_lccn("sn84026749"));
    }

    #[test]
    fn rejects_malformed_lccn() {
        assert!(!is_valid_lccn("83045604"));
        assert!(!is_valid_lccn("sn830456"));
        assert!(!is_valid_lccn("SN83045604"));
        assert!(!is_valid_lccn(""));
    }
}

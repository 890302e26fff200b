use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Processing status of a `Page`. Transitions monotonically except for
/// `Failed`, which may be re-queued back to `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    New,
    Queued,
    Processing,
    OcrDone,
    Segmented,
    Failed,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::OcrDone => "ocr_done",
            Self::Segmented => "segmented",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "ocr_done" => Some(Self::OcrDone),
            "segmented" => Some(Self::Segmented),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether transitioning from `self` to `next` is a legal status
    /// transition under the "monotonic except `failed`" invariant.
    pub fn can_transition_to(self, next: Self) -> bool {
        use PageStatus::*;
        if next == Failed {
            return true;
        }
        if self == Failed {
            return next == Queued;
        }
        let rank = |s: PageStatus| match s {
            New => 0,
            Queued => 1,
            Processing => 2,
            OcrDone => 3,
            Segmented => 4,
            Failed => unreachable!(),
        };
        rank(next) >= rank(self)
    }
}

/// An original newspaper page in the repository store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_id: String,
    pub publication_id: String,
    pub issue_date: NaiveDate,
    pub sequence: i32,
    pub source_system: String,
    pub image_ref: String,
    pub ocr_text_ref: Option<String>,
    pub hocr_ref: Option<String>,
    pub status: PageStatus,
    pub metadata: HashMap<String, Value>,
}

impl Page {
    /// The unique key the repository enforces:
    /// `(publication_id, issue_date, sequence, source_system)`.
    pub fn unique_key(&self) -> (String, NaiveDate, i32, String) {
        (
            self.publication_id.clone(),
            self.issue_date,
            self.sequence,
            self.source_system.clone(),
        )
    }
}

/// Metadata about a page as returned by the archive client's search results,
/// prior to being stored in the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMetadata {
    pub publication_id: String,
    pub issue_date: NaiveDate,
    pub sequence: i32,
    pub source_system: String,
    pub title: Option<String>,
    pub raw: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_transitions_allowed() {
        assert!(PageStatus::New.can_transition_to(PageStatus::Queued));
        assert!(PageStatus::Queued.can_transition_to(PageStatus::Processing));
        assert!(PageStatus::Processing.can_transition_to(PageStatus::OcrDone));
        assert!(PageStatus::OcrDone.can_transition_to(PageStatus::Segmented));
    }

    #[test]
    fn backwards_transitions_rejected_except_failed_requeue() {
        assert!(!PageStatus::Segmented.can_transition_to(PageStatus::New));
        assert!(PageStatus::Failed.can_transition_to(PageStatus::Queued));
        assert!(!PageStatus::Failed.can_transition_to(PageStatus::Segmented));
    }

    #[test]
    fn any_state_can_fail() {
        assert!(PageStatus::New.can_transition_to(PageStatus::Failed));
        assert!(PageStatus::Segmented.can_transition_to(PageStatus::Failed));
    }
}

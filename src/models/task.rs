use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Ocr,
    Segment,
    Reindex,
    Export,
    Import,
    Promote,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ocr => "ocr",
            Self::Segment => "segment",
            Self::Reindex => "reindex",
            Self::Export => "export",
            Self::Import => "import",
            Self::Promote => "promote",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ocr" => Some(Self::Ocr),
            "segment" => Some(Self::Segment),
            "reindex" => Some(Self::Reindex),
            "export" => Some(Self::Export),
            "import" => Some(Self::Import),
            "promote" => Some(Self::Promote),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Leased,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "leased" => Some(Self::Leased),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// A unit of work tracked by the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub page_id: Option<String>,
    pub operation: Operation,
    pub parameters: HashMap<String, Value>,
    pub priority: i32,
    pub status: TaskStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// When the current lease was acquired; `None` unless `status = leased`.
    /// Distinct from `enqueued_at` so overdue-task force-expiry measures
    /// execution time rather than queue wait time.
    pub leased_at: Option<DateTime<Utc>>,
    pub bulk_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub next_eligible_at: Option<DateTime<Utc>>,
}

/// `base_retry_delay * 2^(attempts-1)` capped at `cap_secs`.
pub fn backoff_delay(attempts: i32, base_secs: i64, cap_secs: i64) -> i64 {
    if attempts <= 0 {
        return base_secs.min(cap_secs);
    }
    let shift = (attempts - 1).min(62) as u32;
    base_secs
        .checked_shl(shift)
        .map(|v| v.min(cap_secs))
        .unwrap_or(cap_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(1, 300, 3600), 300);
        assert_eq!(backoff_delay(2, 300, 3600), 600);
        assert_eq!(backoff_delay(3, 300, 3600), 1200);
    }

    #[test]
    fn backoff_caps_out() {
        assert_eq!(backoff_delay(10, 300, 3600), 3600);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Leased.is_terminal());
    }
}

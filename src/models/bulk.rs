use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStatus {
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl BulkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkCounters {
    pub total: i32,
    pub pending: i32,
    pub in_progress: i32,
    pub succeeded: i32,
    pub failed: i32,
}

impl BulkCounters {
    /// A bulk completes with `status=completed` iff every child task is in
    /// a terminal state, regardless of whether any of them failed.
    pub fn all_terminal(&self) -> bool {
        self.pending == 0 && self.in_progress == 0 && self.total > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOperation {
    pub bulk_id: String,
    pub description: String,
    pub operation: String,
    pub status: BulkStatus,
    pub counters: BulkCounters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_with_failures_is_still_completed() {
        let counters = BulkCounters {
            total: 10,
            pending: 0,
            in_progress: 0,
            succeeded: 7,
            failed: 3,
        };
        assert!(counters.all_terminal());
    }

    #[test]
    fn not_terminal_while_work_remains() {
        let counters = BulkCounters {
            total: 10,
            pending: 1,
            in_progress: 0,
            succeeded: 9,
            failed: 0,
        };
        assert!(!counters.all_terminal());
    }
}

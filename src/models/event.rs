use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A historical record in the main events store, promoted from one or more
/// segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub title: String,
    pub event_date: NaiveDate,
    pub body: String,
    pub source_description: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Maps `segment_id ↔ event_id`. Each segment links to at most one event;
/// an event may be linked from multiple segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLink {
    pub segment_id: String,
    pub event_id: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

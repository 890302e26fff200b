use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An editorial composition of one or more segments on the same page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub article_id: String,
    pub page_id: String,
    pub segment_ids: Vec<String>,
    pub title: String,
    pub combined_text: String,
    pub metadata: HashMap<String, Value>,
}

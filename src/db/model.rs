//! View models returned by repository queries.
//!
//! Keep these structs focused on the data returned by queries. Selection
//! logic lives in `briefing::composer`.

use crate::model::Tier;
use chrono::{DateTime, Utc};

/// Slice of an undelivered processed item used by the briefing composer.
/// Joins `processed_content` with the owning `content_items` row.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub content_id: String,
    pub source_id: String,
    pub tier: Tier,
    pub is_backlog: bool,
    pub word_count: i64,
    pub published_at: DateTime<Utc>,
}

/// Count of rows sharing one label (status or tier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCount {
    pub label: String,
    pub count: i64,
}

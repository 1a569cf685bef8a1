use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{InsightItem, MigrationGuide, ReleaseTagKind};

/// Reason attached to keyword-derived tags.
pub const AUTO_TAG_REASON: &str = "Auto-extracted";

/// Published once a release has been translated and analysed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseEvent {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub payload: ReleasePayload,
}

impl ReleaseEvent {
    pub fn new(payload: ReleasePayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Partition key for downstream ordering.
    pub fn key(&self) -> &str {
        &self.payload.tech_stack_name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasePayload {
    pub tech_stack_name: String,
    pub version: String,
    pub title: String,
    pub content: String,
    pub content_translated: Option<String>,
    pub short_summary: Option<String>,
    pub insights: Vec<InsightItem>,
    pub migration_guide: Option<MigrationGuide>,
    pub technical_keywords: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub source_url: Option<String>,
    pub tags: Vec<EventTag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTag {
    #[serde(rename = "type")]
    pub kind: ReleaseTagKind,
    pub reason: String,
}

impl EventTag {
    pub fn auto(kind: ReleaseTagKind) -> Self {
        Self {
            kind,
            reason: AUTO_TAG_REASON.to_string(),
        }
    }
}

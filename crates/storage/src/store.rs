//! Persistence seam shared by the ingestion engine and the backlog processor.
//!
//! [`PgStore`](crate::PgStore) is the production implementation;
//! [`MemoryStore`](crate::MemoryStore) backs tests and database-less runs.

use async_trait::async_trait;
use changewire_core::{
    AiRequestOutcome, BacklogEntry, BacklogItem, BacklogStatus, IncomingMetadata, InsightPayload,
    NewAiRequest, NewRelease, ReleaseRecord, ReleaseTagKind, SourceKind, TechStack,
    TechStackSource,
};

use crate::error::StoreError;

/// Result of recording a newly discovered release.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRelease {
    pub release: ReleaseRecord,
    pub tags: Vec<ReleaseTagKind>,
    /// The backlog entry created alongside the release, `None` if one already existed.
    pub backlog: Option<BacklogEntry>,
}

#[async_trait]
pub trait ReleaseStore: Send + Sync {
    // ── Components & sources ────────────────────────────────

    async fn list_sources(&self) -> Result<Vec<TechStackSource>, StoreError>;

    async fn get_source(&self, id: i64) -> Result<Option<TechStackSource>, StoreError>;

    async fn get_tech_stack(&self, id: i64) -> Result<Option<TechStack>, StoreError>;

    /// Insert by name, or update category/color when the incoming value is present.
    async fn upsert_tech_stack(
        &self,
        name: &str,
        category: Option<&str>,
        color_hex: Option<&str>,
    ) -> Result<TechStack, StoreError>;

    /// Insert or update the (component, kind) source, merging its metadata bag.
    async fn upsert_source(
        &self,
        tech_stack_id: i64,
        kind: SourceKind,
        metadata: &[IncomingMetadata],
    ) -> Result<TechStackSource, StoreError>;

    async fn update_latest_version(&self, tech_stack_id: i64, version: &str)
        -> Result<(), StoreError>;

    // ── Releases ────────────────────────────────────────────

    async fn release_exists(&self, tech_stack_id: i64, version: &str) -> Result<bool, StoreError>;

    /// Persist a release, its tags and its backlog entry as one unit.
    ///
    /// Re-checks existence inside the unit; returns `None` when the
    /// (component, version) pair was already recorded.
    async fn record_release(
        &self,
        release: &NewRelease,
        tags: &[ReleaseTagKind],
    ) -> Result<Option<RecordedRelease>, StoreError>;

    async fn get_release(&self, id: i64) -> Result<Option<ReleaseRecord>, StoreError>;

    async fn list_releases(&self, tech_stack_id: i64) -> Result<Vec<ReleaseRecord>, StoreError>;

    async fn release_tags(&self, release_id: i64) -> Result<Vec<ReleaseTagKind>, StoreError>;

    async fn save_translation(&self, release_id: i64, translated: &str) -> Result<(), StoreError>;

    async fn save_insights(&self, release_id: i64, payload: &InsightPayload)
        -> Result<(), StoreError>;

    // ── Backlog ─────────────────────────────────────────────

    async fn count_backlog(&self, status: BacklogStatus) -> Result<u64, StoreError>;

    /// Move up to `limit` pending entries (oldest first) to `PROCESSING`
    /// and return them with their releases.
    async fn claim_pending(&self, limit: u32) -> Result<Vec<BacklogItem>, StoreError>;

    /// Persist status, retry counter and last error of an entry.
    async fn save_backlog(&self, entry: &BacklogEntry) -> Result<(), StoreError>;

    async fn get_backlog(&self, id: i64) -> Result<Option<BacklogEntry>, StoreError>;

    // ── AI request log ──────────────────────────────────────

    async fn log_ai_request(&self, request: &NewAiRequest) -> Result<i64, StoreError>;

    async fn complete_ai_request(&self, id: i64, outcome: &AiRequestOutcome)
        -> Result<(), StoreError>;
}

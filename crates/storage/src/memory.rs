//! In-process [`ReleaseStore`] used by tests and database-less runs.
//!
//! A single `tokio::sync::Mutex` guards all tables, so every trait method is
//! one atomic step, matching the transaction scopes of the PostgreSQL store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use changewire_core::{
    AiRequestLog, AiRequestOutcome, AiRequestStatus, BacklogEntry, BacklogItem, BacklogStatus,
    IncomingMetadata, InsightPayload, NewAiRequest, NewRelease, ReleaseRecord, ReleaseTagKind,
    SourceKind, SourceMetadata, TechStack, TechStackSource,
};

use crate::error::StoreError;
use crate::store::{RecordedRelease, ReleaseStore};

#[derive(Default)]
struct Tables {
    next_id: i64,
    tech_stacks: BTreeMap<i64, TechStack>,
    sources: BTreeMap<i64, TechStackSource>,
    releases: BTreeMap<i64, ReleaseRecord>,
    tags: BTreeMap<i64, Vec<ReleaseTagKind>>,
    backlog: BTreeMap<i64, BacklogEntry>,
    ai_requests: BTreeMap<i64, AiRequestLog>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn tech_stack_name(&self, id: i64) -> String {
        self.tech_stacks
            .get(&id)
            .map(|t| t.name.clone())
            .unwrap_or_default()
    }

    fn find_release(&self, tech_stack_id: i64, version: &str) -> Option<&ReleaseRecord> {
        self.releases
            .values()
            .find(|r| r.tech_stack_id == tech_stack_id && r.version == version)
    }

    fn insert_backlog(&mut self, release_id: i64) -> Option<BacklogEntry> {
        if self.backlog.values().any(|b| b.release_id == release_id) {
            return None;
        }
        let now = Utc::now();
        let entry = BacklogEntry {
            id: self.next_id(),
            release_id,
            status: BacklogStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.backlog.insert(entry.id, entry.clone());
        Some(entry)
    }

    fn release_mut(&mut self, id: i64) -> Result<&mut ReleaseRecord, StoreError> {
        self.releases
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("release_record", id))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component with one source, bypassing catalog sync.
    pub async fn add_source(
        &self,
        name: &str,
        kind: SourceKind,
        metadata: SourceMetadata,
    ) -> TechStackSource {
        let mut t = self.tables.lock().await;
        let existing = t.tech_stacks.values().find(|s| s.name == name).map(|s| s.id);
        let tech_stack_id = match existing {
            Some(id) => id,
            None => {
                let id = t.next_id();
                t.tech_stacks.insert(
                    id,
                    TechStack {
                        id,
                        name: name.to_string(),
                        latest_version: None,
                        category: None,
                        color_hex: None,
                    },
                );
                id
            }
        };
        let source = TechStackSource {
            id: t.next_id(),
            tech_stack_id,
            tech_stack_name: name.to_string(),
            kind,
            metadata,
        };
        t.sources.insert(source.id, source.clone());
        source
    }

    pub async fn ai_requests(&self) -> Vec<AiRequestLog> {
        self.tables.lock().await.ai_requests.values().cloned().collect()
    }

    pub async fn backlog_entries(&self) -> Vec<BacklogEntry> {
        self.tables.lock().await.backlog.values().cloned().collect()
    }
}

#[async_trait]
impl ReleaseStore for MemoryStore {
    async fn list_sources(&self) -> Result<Vec<TechStackSource>, StoreError> {
        Ok(self.tables.lock().await.sources.values().cloned().collect())
    }

    async fn get_source(&self, id: i64) -> Result<Option<TechStackSource>, StoreError> {
        Ok(self.tables.lock().await.sources.get(&id).cloned())
    }

    async fn get_tech_stack(&self, id: i64) -> Result<Option<TechStack>, StoreError> {
        Ok(self.tables.lock().await.tech_stacks.get(&id).cloned())
    }

    async fn upsert_tech_stack(
        &self,
        name: &str,
        category: Option<&str>,
        color_hex: Option<&str>,
    ) -> Result<TechStack, StoreError> {
        let name = name.trim();
        let category = category.map(str::trim).filter(|s| !s.is_empty());
        let color_hex = color_hex.map(str::trim).filter(|s| !s.is_empty());

        let mut t = self.tables.lock().await;
        if let Some(existing) = t.tech_stacks.values_mut().find(|s| s.name == name) {
            if let Some(c) = category {
                existing.category = Some(c.to_string());
            }
            if let Some(c) = color_hex {
                existing.color_hex = Some(c.to_string());
            }
            return Ok(existing.clone());
        }
        let stack = TechStack {
            id: t.next_id(),
            name: name.to_string(),
            latest_version: None,
            category: category.map(String::from),
            color_hex: color_hex.map(String::from),
        };
        t.tech_stacks.insert(stack.id, stack.clone());
        Ok(stack)
    }

    async fn upsert_source(
        &self,
        tech_stack_id: i64,
        kind: SourceKind,
        metadata: &[IncomingMetadata],
    ) -> Result<TechStackSource, StoreError> {
        let mut t = self.tables.lock().await;
        let name = t
            .tech_stacks
            .get(&tech_stack_id)
            .map(|s| s.name.clone())
            .ok_or_else(|| StoreError::not_found("tech_stack", tech_stack_id))?;

        let existing = t
            .sources
            .values()
            .find(|s| s.tech_stack_id == tech_stack_id && s.kind == kind)
            .map(|s| s.id);
        let id = match existing {
            Some(id) => id,
            None => t.next_id(),
        };
        let source = t.sources.entry(id).or_insert_with(|| TechStackSource {
            id,
            tech_stack_id,
            tech_stack_name: name,
            kind,
            metadata: SourceMetadata::default(),
        });
        source.metadata.merge(metadata);
        Ok(source.clone())
    }

    async fn update_latest_version(
        &self,
        tech_stack_id: i64,
        version: &str,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.lock().await;
        let stack = t
            .tech_stacks
            .get_mut(&tech_stack_id)
            .ok_or_else(|| StoreError::not_found("tech_stack", tech_stack_id))?;
        stack.latest_version = Some(version.to_string());
        Ok(())
    }

    async fn release_exists(&self, tech_stack_id: i64, version: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .find_release(tech_stack_id, version)
            .is_some())
    }

    async fn record_release(
        &self,
        release: &NewRelease,
        tags: &[ReleaseTagKind],
    ) -> Result<Option<RecordedRelease>, StoreError> {
        let mut t = self.tables.lock().await;
        if t.find_release(release.tech_stack_id, &release.version).is_some() {
            return Ok(None);
        }
        let record = ReleaseRecord {
            id: t.next_id(),
            tech_stack_id: release.tech_stack_id,
            version: release.version.clone(),
            title: release.title.clone(),
            content: release.content.clone(),
            content_translated: None,
            short_summary: None,
            insights: None,
            migration_guide: None,
            technical_keywords: None,
            published_at: release.published_at,
            source_url: release.source_url.clone(),
            created_at: Utc::now(),
        };
        t.releases.insert(record.id, record.clone());

        let mut unique_tags = tags.to_vec();
        unique_tags.sort();
        unique_tags.dedup();
        t.tags.insert(record.id, unique_tags.clone());

        let backlog = t.insert_backlog(record.id);
        Ok(Some(RecordedRelease {
            release: record,
            tags: unique_tags,
            backlog,
        }))
    }

    async fn get_release(&self, id: i64) -> Result<Option<ReleaseRecord>, StoreError> {
        Ok(self.tables.lock().await.releases.get(&id).cloned())
    }

    async fn list_releases(&self, tech_stack_id: i64) -> Result<Vec<ReleaseRecord>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .releases
            .values()
            .filter(|r| r.tech_stack_id == tech_stack_id)
            .cloned()
            .collect())
    }

    async fn release_tags(&self, release_id: i64) -> Result<Vec<ReleaseTagKind>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .tags
            .get(&release_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_translation(&self, release_id: i64, translated: &str) -> Result<(), StoreError> {
        let mut t = self.tables.lock().await;
        t.release_mut(release_id)?.content_translated = Some(translated.to_string());
        Ok(())
    }

    async fn save_insights(
        &self,
        release_id: i64,
        payload: &InsightPayload,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.lock().await;
        t.release_mut(release_id)?.apply_insights(payload);
        Ok(())
    }

    async fn count_backlog(&self, status: BacklogStatus) -> Result<u64, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .backlog
            .values()
            .filter(|b| b.status == status)
            .count() as u64)
    }

    async fn claim_pending(&self, limit: u32) -> Result<Vec<BacklogItem>, StoreError> {
        let mut t = self.tables.lock().await;

        let mut pending: Vec<&BacklogEntry> = t
            .backlog
            .values()
            .filter(|b| b.status == BacklogStatus::Pending)
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let ids: Vec<i64> = pending.iter().take(limit as usize).map(|b| b.id).collect();

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(entry) = t.backlog.get_mut(&id) else {
                continue;
            };
            entry.mark_processing();
            let entry = entry.clone();
            let release = t
                .releases
                .get(&entry.release_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("release_record", entry.release_id))?;
            items.push(BacklogItem {
                tech_stack_name: t.tech_stack_name(release.tech_stack_id),
                tags: t.tags.get(&release.id).cloned().unwrap_or_default(),
                entry,
                release,
            });
        }
        Ok(items)
    }

    async fn save_backlog(&self, entry: &BacklogEntry) -> Result<(), StoreError> {
        let mut t = self.tables.lock().await;
        let stored = t
            .backlog
            .get_mut(&entry.id)
            .ok_or_else(|| StoreError::not_found("translation_backlog", entry.id))?;
        stored.status = entry.status;
        stored.retry_count = entry.retry_count;
        stored.last_error = entry.last_error.clone();
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn get_backlog(&self, id: i64) -> Result<Option<BacklogEntry>, StoreError> {
        Ok(self.tables.lock().await.backlog.get(&id).cloned())
    }

    async fn log_ai_request(&self, request: &NewAiRequest) -> Result<i64, StoreError> {
        let mut t = self.tables.lock().await;
        let log = AiRequestLog {
            id: t.next_id(),
            provider: request.provider.clone(),
            model: request.model.clone(),
            request_type: request.request_type,
            status: AiRequestStatus::Requested,
            batch_size: request.batch_size,
            input_chars: request.input_chars,
            output_chars: 0,
            duration_ms: 0,
            error_message: None,
            created_at: Utc::now(),
        };
        let id = log.id;
        t.ai_requests.insert(id, log);
        Ok(id)
    }

    async fn complete_ai_request(
        &self,
        id: i64,
        outcome: &AiRequestOutcome,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.lock().await;
        let log = t
            .ai_requests
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("ai_request_log", id))?;
        log.status = outcome.status;
        log.output_chars = outcome.output_chars;
        log.duration_ms = outcome.duration_ms;
        log.error_message = outcome.error_message.clone();
        Ok(())
    }
}

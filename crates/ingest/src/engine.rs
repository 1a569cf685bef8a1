//! Release ingestion engine.
//!
//! One invocation walks the candidate versions of one tracked source in
//! resolver order. Each new version is recorded together with its tags and
//! backlog entry in a single store step, so a fault mid-walk only loses the
//! version in flight.

use std::sync::Arc;

use changewire_core::{extract_tags, NewRelease, ReleaseTagKind, TechStackSource};
use changewire_sources::{
    Candidate, DetailFetcher, DetailSource, Resolution, SkipReason, SourceResolver, Upstream,
};
use changewire_storage::ReleaseStore;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::error::IngestError;

/// Result of one `ingest` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New releases were recorded, in walk order.
    Ingested { versions: Vec<String> },
    /// Every candidate was already recorded or had no release notes.
    UpToDate,
    Skipped(SkipReason),
    /// The invocation faulted; the message carries component and step.
    Failed(String),
}

/// Tally of one crawl pass over all sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub sources: usize,
    pub ingested: usize,
    pub up_to_date: usize,
    pub skipped: usize,
    pub failed: usize,
    pub releases: usize,
}

impl CrawlReport {
    fn record(&mut self, outcome: &IngestOutcome) {
        self.sources += 1;
        match outcome {
            IngestOutcome::Ingested { versions } => {
                self.ingested += 1;
                self.releases += versions.len();
            }
            IngestOutcome::UpToDate => self.up_to_date += 1,
            IngestOutcome::Skipped(_) => self.skipped += 1,
            IngestOutcome::Failed(_) => self.failed += 1,
        }
    }
}

pub struct IngestionEngine {
    store: Arc<dyn ReleaseStore>,
    resolver: SourceResolver,
    fetcher: DetailFetcher,
}

impl IngestionEngine {
    pub fn new(
        store: Arc<dyn ReleaseStore>,
        upstream: Arc<dyn Upstream>,
        tag_limit: u32,
        feed_limit: u32,
    ) -> Self {
        Self {
            store,
            resolver: SourceResolver::new(upstream.clone(), tag_limit, feed_limit),
            fetcher: DetailFetcher::new(upstream),
        }
    }

    /// Ingest every tracked source, one after another.
    pub async fn crawl(&self) -> CrawlReport {
        let sources = match self.store.list_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                error!(error = %e, "Could not list tracked sources");
                return CrawlReport::default();
            }
        };
        let ids: Vec<i64> = sources.iter().map(|s| s.id).collect();
        self.ingest_each(&ids).await
    }

    pub async fn ingest_each(&self, source_ids: &[i64]) -> CrawlReport {
        let start = Instant::now();
        let mut report = CrawlReport::default();
        for &id in source_ids {
            let outcome = self.ingest(id).await;
            report.record(&outcome);
        }
        info!(
            sources = report.sources,
            ingested = report.ingested,
            releases = report.releases,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Crawl pass finished"
        );
        report
    }

    /// Ingest one source. Never fails: faults are logged and reported.
    pub async fn ingest(&self, source_id: i64) -> IngestOutcome {
        match self.try_ingest(source_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(source_id, error = %e, "Ingestion failed");
                IngestOutcome::Failed(e.to_string())
            }
        }
    }

    async fn try_ingest(&self, source_id: i64) -> Result<IngestOutcome, IngestError> {
        let source = self
            .store
            .get_source(source_id)
            .await
            .map_err(IngestError::store("unknown component", "load source"))?
            .ok_or(IngestError::SourceNotFound(source_id))?;
        let component = source.tech_stack_name.as_str();

        let resolved = match self.resolver.resolve(&source).await {
            Resolution::Resolved(resolved) => resolved,
            Resolution::Skipped(reason) => {
                warn!(component, kind = %source.kind, reason = %reason, "Source skipped");
                return Ok(IngestOutcome::Skipped(reason));
            }
        };

        let mut versions = Vec::new();
        let mut fault = None;
        for candidate in &resolved.candidates {
            match self.ingest_version(&source, &resolved.details, candidate).await {
                Ok(true) => versions.push(candidate.version.clone()),
                Ok(false) => {}
                Err(e) => {
                    fault = Some(e);
                    break;
                }
            }
        }

        // Releases recorded before a fault stay recorded, so the pointer still moves.
        if let Some(last) = versions.last() {
            self.store
                .update_latest_version(source.tech_stack_id, last)
                .await
                .map_err(IngestError::store(component, "update latest version"))?;
            info!(component, latest = %last, created = versions.len(), "Tracked version advanced");
        }

        if let Some(e) = fault {
            return Err(e);
        }
        if versions.is_empty() {
            debug!(component, "No new releases");
            return Ok(IngestOutcome::UpToDate);
        }
        Ok(IngestOutcome::Ingested { versions })
    }

    /// Record one candidate; `Ok(false)` when it was skipped.
    async fn ingest_version(
        &self,
        source: &TechStackSource,
        details: &DetailSource,
        candidate: &Candidate,
    ) -> Result<bool, IngestError> {
        let component = source.tech_stack_name.as_str();
        let version = candidate.version.as_str();

        let exists = self
            .store
            .release_exists(source.tech_stack_id, version)
            .await
            .map_err(IngestError::store(component, "check release existence"))?;
        if exists {
            trace!(component, version, "Already recorded");
            return Ok(false);
        }

        let Some(detail) = self.fetcher.fetch(details, candidate).await else {
            debug!(component, version, "No release notes, version skipped");
            return Ok(false);
        };

        let tags: Vec<ReleaseTagKind> = extract_tags(&detail.content).into_iter().collect();
        let release = NewRelease {
            tech_stack_id: source.tech_stack_id,
            version: version.to_string(),
            title: detail.title,
            content: detail.content,
            published_at: detail.published_at,
            source_url: detail.url,
        };

        let recorded = self
            .store
            .record_release(&release, &tags)
            .await
            .map_err(IngestError::store(component, "record release"))?;
        match recorded {
            Some(recorded) => {
                info!(
                    component,
                    version,
                    release_id = recorded.release.id,
                    tags = recorded.tags.len(),
                    backlog_id = recorded.backlog.as_ref().map(|b| b.id),
                    "Release recorded"
                );
                Ok(true)
            }
            None => {
                debug!(component, version, "Recorded concurrently by another run");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use changewire_core::{
        keys, AiRequestOutcome, BacklogEntry, BacklogItem, BacklogStatus, IncomingMetadata,
        InsightPayload, MetadataEntry, NewAiRequest, ReleaseRecord, SourceKind, SourceMetadata,
        TechStack,
    };
    use changewire_sources::upstream::mock::ScriptedUpstream;
    use changewire_sources::ReleaseDetail;
    use changewire_storage::{MemoryStore, RecordedRelease, StoreError};

    use super::*;

    fn github(owner: &str, repo: &str) -> SourceMetadata {
        SourceMetadata::new(vec![
            MetadataEntry::new(keys::GITHUB_OWNER, owner),
            MetadataEntry::new(keys::GITHUB_REPO, repo),
        ])
    }

    fn notes(title: &str, content: &str) -> ReleaseDetail {
        ReleaseDetail {
            title: title.to_string(),
            content: content.to_string(),
            published_at: None,
            url: None,
        }
    }

    fn engine(store: &Arc<MemoryStore>, upstream: ScriptedUpstream) -> IngestionEngine {
        IngestionEngine::new(store.clone(), Arc::new(upstream), 30, 30)
    }

    async fn latest(store: &MemoryStore, tech_stack_id: i64) -> Option<String> {
        store
            .get_tech_stack(tech_stack_id)
            .await
            .unwrap()
            .unwrap()
            .latest_version
    }

    #[tokio::test]
    async fn test_vcs_only_source_records_both_tags() {
        let store = Arc::new(MemoryStore::new());
        let source = store.add_source("Vite", SourceKind::Github, github("vitejs", "vite")).await;
        let upstream = ScriptedUpstream::new()
            .with_tags("vitejs", "vite", &["v1.0.0", "1.1.0"])
            .with_release("vitejs", "vite", "v1.0.0", notes("v1.0.0", "Initial release"))
            .with_release("vitejs", "vite", "1.1.0", notes("", "Security fix for dev server"));

        let outcome = engine(&store, upstream).ingest(source.id).await;
        assert_eq!(
            outcome,
            IngestOutcome::Ingested {
                versions: vec!["v1.0.0".into(), "1.1.0".into()]
            }
        );

        let releases = store.list_releases(source.tech_stack_id).await.unwrap();
        assert_eq!(releases.len(), 2);
        assert_eq!(latest(&store, source.tech_stack_id).await.as_deref(), Some("1.1.0"));

        let patched = releases.iter().find(|r| r.version == "1.1.0").unwrap();
        assert_eq!(patched.title, "1.1.0");
        assert_eq!(
            store.release_tags(patched.id).await.unwrap(),
            vec![ReleaseTagKind::Security, ReleaseTagKind::Fix]
        );
    }

    #[tokio::test]
    async fn test_ingest_twice_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let source = store.add_source("Vue", SourceKind::Github, github("vuejs", "core")).await;
        let upstream = ScriptedUpstream::new()
            .with_tags("vuejs", "core", &["v3.4.0"])
            .with_release("vuejs", "core", "v3.4.0", notes("3.4", "notes"));
        let engine = engine(&store, upstream);

        assert!(matches!(engine.ingest(source.id).await, IngestOutcome::Ingested { .. }));
        assert_eq!(engine.ingest(source.id).await, IngestOutcome::UpToDate);

        let releases = store.list_releases(source.tech_stack_id).await.unwrap();
        assert_eq!(releases.len(), 1);
        let backlog = store.backlog_entries().await;
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].release_id, releases[0].id);
        assert_eq!(backlog[0].status, BacklogStatus::Pending);
    }

    #[tokio::test]
    async fn test_missing_notes_skip_version_but_walk_continues() {
        let store = Arc::new(MemoryStore::new());
        let source = store.add_source("Deno", SourceKind::Github, github("denoland", "deno")).await;
        // No release is published for 1.0.0 under either tag variant.
        let upstream = ScriptedUpstream::new()
            .with_tags("denoland", "deno", &["1.0.0", "1.0.1"])
            .with_release("denoland", "deno", "v1.0.1", notes("v1.0.1", "fixes"));

        let outcome = engine(&store, upstream).ingest(source.id).await;
        assert_eq!(outcome, IngestOutcome::Ingested { versions: vec!["1.0.1".into()] });

        assert!(!store.release_exists(source.tech_stack_id, "1.0.0").await.unwrap());
        assert_eq!(latest(&store, source.tech_stack_id).await.as_deref(), Some("1.0.1"));
    }

    #[tokio::test]
    async fn test_latest_version_follows_walk_order() {
        let store = Arc::new(MemoryStore::new());
        let source = store.add_source("Go", SourceKind::Github, github("golang", "go")).await;
        let upstream = ScriptedUpstream::new()
            .with_tags("golang", "go", &["2.0.0", "1.9.0"])
            .with_release("golang", "go", "2.0.0", notes("2", ""))
            .with_release("golang", "go", "1.9.0", notes("1.9", ""));

        engine(&store, upstream).ingest(source.id).await;
        assert_eq!(latest(&store, source.tech_stack_id).await.as_deref(), Some("1.9.0"));
    }

    #[tokio::test]
    async fn test_version_only_npm_source() {
        let store = Arc::new(MemoryStore::new());
        let source = store
            .add_source(
                "Lodash",
                SourceKind::Npm,
                SourceMetadata::new(vec![MetadataEntry::new(keys::NPM_PACKAGE_NAME, "lodash")]),
            )
            .await;
        let upstream = ScriptedUpstream::new().with_package("lodash", &["4.17.20", "4.17.21"]);

        engine(&store, upstream).ingest(source.id).await;
        let releases = store.list_releases(source.tech_stack_id).await.unwrap();
        assert_eq!(releases.len(), 2);
        assert!(releases.iter().all(|r| r.content.is_empty() && r.source_url.is_none()));
        assert_eq!(store.backlog_entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_coordinates_skip_without_mutation() {
        let store = Arc::new(MemoryStore::new());
        let source = store
            .add_source("Kotlin", SourceKind::Maven, SourceMetadata::default())
            .await;
        let upstream = ScriptedUpstream::new();
        let outcome = engine(&store, upstream).ingest(source.id).await;

        assert!(matches!(outcome, IngestOutcome::Skipped(SkipReason::MissingCoordinates(_))));
        assert!(store.list_releases(source.tech_stack_id).await.unwrap().is_empty());
        assert_eq!(latest(&store, source.tech_stack_id).await, None);
    }

    #[tokio::test]
    async fn test_unknown_source_does_not_stop_the_pass() {
        let store = Arc::new(MemoryStore::new());
        let source = store.add_source("Bun", SourceKind::Github, github("oven-sh", "bun")).await;
        let upstream = ScriptedUpstream::new()
            .with_tags("oven-sh", "bun", &["bun-v1.1.0"])
            .with_release("oven-sh", "bun", "bun-v1.1.0", notes("Bun 1.1", "New feature"));
        let engine = engine(&store, upstream);

        assert!(matches!(engine.ingest(9_999).await, IngestOutcome::Failed(_)));

        let report = engine.ingest_each(&[9_999, source.id]).await;
        assert_eq!(report.sources, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.ingested, 1);
        assert_eq!(report.releases, 1);
    }

    #[tokio::test]
    async fn test_feed_source_uses_entry_content() {
        use changewire_sources::FeedEntry;

        let store = Arc::new(MemoryStore::new());
        let url = "https://example.com/releases.xml";
        let source = store
            .add_source(
                "Kubernetes",
                SourceKind::Rss,
                SourceMetadata::new(vec![MetadataEntry::new(keys::RSS_URL, url)]),
            )
            .await;
        let upstream = ScriptedUpstream::new().with_feed(
            url,
            vec![FeedEntry {
                version: "1.30.0".into(),
                title: "Release v1.30.0".into(),
                content: "Breaking: deprecated API removed".into(),
                published_at: Some(chrono::Utc::now()),
                link: Some("https://example.com/1.30.0".into()),
            }],
        );

        let report = engine(&store, upstream).crawl().await;
        assert_eq!(report.releases, 1);

        let release = &store.list_releases(source.tech_stack_id).await.unwrap()[0];
        assert_eq!(release.title, "Release v1.30.0");
        assert_eq!(release.source_url.as_deref(), Some("https://example.com/1.30.0"));
        assert_eq!(
            store.release_tags(release.id).await.unwrap(),
            vec![ReleaseTagKind::Breaking]
        );
    }

    /// Lets a concurrent run record `contested` between the existence check
    /// and this engine's own insert.
    struct RacingStore {
        inner: Arc<MemoryStore>,
        contested: String,
    }

    #[async_trait::async_trait]
    impl ReleaseStore for RacingStore {
        async fn list_sources(&self) -> Result<Vec<TechStackSource>, StoreError> {
            self.inner.list_sources().await
        }

        async fn get_source(&self, id: i64) -> Result<Option<TechStackSource>, StoreError> {
            self.inner.get_source(id).await
        }

        async fn get_tech_stack(&self, id: i64) -> Result<Option<TechStack>, StoreError> {
            self.inner.get_tech_stack(id).await
        }

        async fn upsert_tech_stack(
            &self,
            name: &str,
            category: Option<&str>,
            color_hex: Option<&str>,
        ) -> Result<TechStack, StoreError> {
            self.inner.upsert_tech_stack(name, category, color_hex).await
        }

        async fn upsert_source(
            &self,
            tech_stack_id: i64,
            kind: SourceKind,
            metadata: &[IncomingMetadata],
        ) -> Result<TechStackSource, StoreError> {
            self.inner.upsert_source(tech_stack_id, kind, metadata).await
        }

        async fn update_latest_version(
            &self,
            tech_stack_id: i64,
            version: &str,
        ) -> Result<(), StoreError> {
            self.inner.update_latest_version(tech_stack_id, version).await
        }

        async fn release_exists(&self, tech_stack_id: i64, version: &str) -> Result<bool, StoreError> {
            self.inner.release_exists(tech_stack_id, version).await
        }

        async fn record_release(
            &self,
            release: &NewRelease,
            tags: &[ReleaseTagKind],
        ) -> Result<Option<RecordedRelease>, StoreError> {
            if release.version == self.contested {
                self.inner.record_release(release, tags).await?;
            }
            self.inner.record_release(release, tags).await
        }

        async fn get_release(&self, id: i64) -> Result<Option<ReleaseRecord>, StoreError> {
            self.inner.get_release(id).await
        }

        async fn list_releases(&self, tech_stack_id: i64) -> Result<Vec<ReleaseRecord>, StoreError> {
            self.inner.list_releases(tech_stack_id).await
        }

        async fn release_tags(&self, release_id: i64) -> Result<Vec<ReleaseTagKind>, StoreError> {
            self.inner.release_tags(release_id).await
        }

        async fn save_translation(&self, release_id: i64, translated: &str) -> Result<(), StoreError> {
            self.inner.save_translation(release_id, translated).await
        }

        async fn save_insights(
            &self,
            release_id: i64,
            payload: &InsightPayload,
        ) -> Result<(), StoreError> {
            self.inner.save_insights(release_id, payload).await
        }

        async fn count_backlog(&self, status: BacklogStatus) -> Result<u64, StoreError> {
            self.inner.count_backlog(status).await
        }

        async fn claim_pending(&self, limit: u32) -> Result<Vec<BacklogItem>, StoreError> {
            self.inner.claim_pending(limit).await
        }

        async fn save_backlog(&self, entry: &BacklogEntry) -> Result<(), StoreError> {
            self.inner.save_backlog(entry).await
        }

        async fn get_backlog(&self, id: i64) -> Result<Option<BacklogEntry>, StoreError> {
            self.inner.get_backlog(id).await
        }

        async fn log_ai_request(&self, request: &NewAiRequest) -> Result<i64, StoreError> {
            self.inner.log_ai_request(request).await
        }

        async fn complete_ai_request(
            &self,
            id: i64,
            outcome: &AiRequestOutcome,
        ) -> Result<(), StoreError> {
            self.inner.complete_ai_request(id, outcome).await
        }
    }

    #[tokio::test]
    async fn test_release_recorded_concurrently_is_not_duplicated() {
        let inner = Arc::new(MemoryStore::new());
        let source = inner.add_source("Nuxt", SourceKind::Github, github("nuxt", "nuxt")).await;
        let upstream = ScriptedUpstream::new()
            .with_tags("nuxt", "nuxt", &["v3.0.0", "v3.1.0"])
            .with_release("nuxt", "nuxt", "v3.0.0", notes("v3.0.0", "Breaking: Vue 3 only"))
            .with_release("nuxt", "nuxt", "v3.1.0", notes("v3.1.0", "Bug fix for SSR"));
        let store = Arc::new(RacingStore {
            inner: inner.clone(),
            contested: "v3.0.0".into(),
        });
        let engine = IngestionEngine::new(store, Arc::new(upstream), 30, 30);

        let outcome = engine.ingest(source.id).await;
        assert_eq!(outcome, IngestOutcome::Ingested { versions: vec!["v3.1.0".into()] });

        let releases = inner.list_releases(source.tech_stack_id).await.unwrap();
        assert_eq!(releases.len(), 2);
        let contested = releases.iter().find(|r| r.version == "v3.0.0").unwrap();
        assert_eq!(
            inner.release_tags(contested.id).await.unwrap(),
            vec![ReleaseTagKind::Breaking]
        );

        let backlog = inner.backlog_entries().await;
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog.iter().filter(|b| b.release_id == contested.id).count(), 1);
        assert_eq!(latest(&inner, source.tech_stack_id).await.as_deref(), Some("v3.1.0"));
    }
}

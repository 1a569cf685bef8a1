//! Backlog processor: one cycle claims a batch of pending entries, runs one
//! translation call and one insight call over it, then settles every entry.
//!
//! Entries are keyed by backlog id towards the gateway. A quota, missing key
//! or interrupted gate aborts the cycle and returns every claimed entry to
//! `PENDING` without charging a retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use changewire_bus::ReleasePublisher;
use changewire_core::config::BacklogConfig;
use changewire_core::{BacklogItem, BacklogStatus, InsightPayload};
use changewire_llm::{AiGateway, BatchInput, BatchResult, BatchStatus};
use changewire_storage::ReleaseStore;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::BacklogError;
use crate::event::release_event;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub pending: u64,
    pub loaded: usize,
    pub done: usize,
    /// Failed attempts sent back to `PENDING`.
    pub retried: usize,
    /// Entries that spent their retry budget.
    pub failed: usize,
    pub published: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing pending.
    Idle,
    /// Too few pending entries and the last cycle is too recent.
    NotReady { pending: u64 },
    /// The gateway could not serve the cycle; claimed entries are pending again.
    Aborted { status: BatchStatus, rolled_back: usize },
    Completed(CycleReport),
}

pub struct BacklogProcessor {
    store: Arc<dyn ReleaseStore>,
    gateway: Arc<dyn AiGateway>,
    publisher: ReleasePublisher,
    settings: BacklogConfig,
    last_run: Mutex<Option<Instant>>,
}

/// Per-entry failure messages, applied once at the end of a cycle.
type Failures = HashMap<i64, String>;

impl BacklogProcessor {
    pub fn new(
        store: Arc<dyn ReleaseStore>,
        gateway: Arc<dyn AiGateway>,
        publisher: ReleasePublisher,
        settings: BacklogConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            publisher,
            settings,
            last_run: Mutex::new(None),
        }
    }

    fn min_interval(&self) -> Duration {
        Duration::from_secs(self.settings.min_interval_minutes.saturating_mul(60))
    }

    /// Scheduled entry point: runs only when enough work piled up or the
    /// previous completed cycle is old enough.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, BacklogError> {
        self.cycle(false).await
    }

    /// Run a cycle regardless of queue size and elapsed time.
    pub async fn run_cycle_forced(&self) -> Result<CycleOutcome, BacklogError> {
        self.cycle(true).await
    }

    async fn cycle(&self, forced: bool) -> Result<CycleOutcome, BacklogError> {
        let pending = self.store.count_backlog(BacklogStatus::Pending).await?;
        if pending == 0 {
            debug!("Backlog empty");
            return Ok(CycleOutcome::Idle);
        }

        if !forced && !self.is_ready(pending).await {
            debug!(pending, min_pending = self.settings.min_pending, "Backlog not ready");
            return Ok(CycleOutcome::NotReady { pending });
        }

        let start = Instant::now();
        let mut items = self.store.claim_pending(self.settings.batch_size).await?;
        if items.is_empty() {
            return Ok(CycleOutcome::Idle);
        }
        info!(pending, loaded = items.len(), "Backlog cycle started");

        let mut failures = Failures::new();
        self.fill_blank_content(&mut items, &mut failures).await;

        let translation = self.translate(&mut items, &mut failures).await;
        if let Some(status) = translation {
            return Ok(self.roll_back(items, status).await);
        }
        let insights = self.extract_insights(&mut items, &mut failures).await;
        if let Some(status) = insights {
            return Ok(self.roll_back(items, status).await);
        }

        let mut report = CycleReport {
            pending,
            loaded: items.len(),
            ..CycleReport::default()
        };
        for item in items {
            self.settle(item, &failures, &mut report).await;
        }
        *self.last_run.lock().await = Some(Instant::now());

        info!(
            loaded = report.loaded,
            done = report.done,
            retried = report.retried,
            failed = report.failed,
            published = report.published,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Backlog cycle finished"
        );
        Ok(CycleOutcome::Completed(report))
    }

    async fn is_ready(&self, pending: u64) -> bool {
        if pending >= u64::from(self.settings.min_pending) {
            return true;
        }
        match *self.last_run.lock().await {
            None => true,
            Some(last) => last.elapsed() >= self.min_interval(),
        }
    }

    /// Releases without a body are enriched locally with empty results.
    async fn fill_blank_content(&self, items: &mut [BacklogItem], failures: &mut Failures) {
        for item in items.iter_mut().filter(|i| i.release.content.trim().is_empty()) {
            let id = item.entry.id;
            if item.release.needs_translation() {
                match self.store.save_translation(item.release.id, "").await {
                    Ok(()) => item.release.content_translated = Some(String::new()),
                    Err(e) => {
                        failures.insert(id, format!("saving translation failed: {e}"));
                    }
                }
            }
            if item.release.needs_insights() {
                let empty = InsightPayload::default();
                match self.store.save_insights(item.release.id, &empty).await {
                    Ok(()) => item.release.apply_insights(&empty),
                    Err(e) => {
                        failures.insert(id, format!("saving insights failed: {e}"));
                    }
                }
            }
        }
    }

    /// Returns the aborting status, if any.
    async fn translate(
        &self,
        items: &mut [BacklogItem],
        failures: &mut Failures,
    ) -> Option<BatchStatus> {
        let inputs = inputs_where(items, |i| i.release.needs_translation());
        if inputs.is_empty() {
            return None;
        }
        let result = self.gateway.translate_batch(&inputs).await;
        if result.aborts_cycle() {
            return Some(result.status);
        }
        let mut translations = accept(result, &inputs, "translation", failures)?;

        for item in items.iter_mut() {
            let id = item.entry.id;
            let Some(text) = translations.remove(&id) else {
                continue;
            };
            match self.store.save_translation(item.release.id, &text).await {
                Ok(()) => item.release.content_translated = Some(text),
                Err(e) => {
                    failures.insert(id, format!("saving translation failed: {e}"));
                }
            }
        }
        None
    }

    async fn extract_insights(
        &self,
        items: &mut [BacklogItem],
        failures: &mut Failures,
    ) -> Option<BatchStatus> {
        let inputs = inputs_where(items, |i| i.release.needs_insights());
        if inputs.is_empty() {
            return None;
        }
        let result = self.gateway.extract_insights_batch(&inputs).await;
        if result.aborts_cycle() {
            return Some(result.status);
        }
        let mut insights = accept(result, &inputs, "insights", failures)?;

        for item in items.iter_mut() {
            let id = item.entry.id;
            let Some(payload) = insights.remove(&id) else {
                continue;
            };
            match self.store.save_insights(item.release.id, &payload).await {
                Ok(()) => item.release.apply_insights(&payload),
                Err(e) => {
                    failures.insert(id, format!("saving insights failed: {e}"));
                }
            }
        }
        None
    }

    async fn roll_back(&self, items: Vec<BacklogItem>, status: BatchStatus) -> CycleOutcome {
        let mut rolled_back = 0usize;
        for mut item in items {
            item.entry.mark_pending();
            match self.store.save_backlog(&item.entry).await {
                Ok(()) => rolled_back += 1,
                Err(e) => error!(backlog_id = item.entry.id, error = %e, "Rollback to PENDING failed"),
            }
        }
        info!(?status, rolled_back, "Backlog cycle aborted");
        CycleOutcome::Aborted { status, rolled_back }
    }

    async fn settle(&self, mut item: BacklogItem, failures: &Failures, report: &mut CycleReport) {
        let id = item.entry.id;
        let error = failures.get(&id).cloned().or_else(|| {
            let missing = match (item.release.needs_translation(), item.release.needs_insights()) {
                (false, false) => return None,
                (true, true) => "translation and insights",
                (true, false) => "translation",
                (false, true) => "insights",
            };
            Some(format!("{missing} missing after cycle"))
        });

        match error {
            Some(error) => {
                item.entry.record_failure(error, self.settings.max_retries);
                if item.entry.status == BacklogStatus::Failed {
                    warn!(
                        backlog_id = id,
                        component = %item.tech_stack_name,
                        version = %item.release.version,
                        retries = item.entry.retry_count,
                        error = item.entry.last_error.as_deref().unwrap_or_default(),
                        "Backlog entry failed for good"
                    );
                    report.failed += 1;
                } else {
                    debug!(backlog_id = id, retries = item.entry.retry_count, "Backlog entry will be retried");
                    report.retried += 1;
                }
            }
            None => {
                let event = release_event(&item);
                match self.publisher.publish(&event).await {
                    Ok(()) => report.published += 1,
                    Err(e) => warn!(
                        backlog_id = id,
                        component = %item.tech_stack_name,
                        version = %item.release.version,
                        error = %e,
                        "Release event not published"
                    ),
                }
                item.entry.mark_done();
                report.done += 1;
            }
        }

        if let Err(e) = self.store.save_backlog(&item.entry).await {
            error!(backlog_id = id, status = %item.entry.status, error = %e, "Saving backlog entry failed");
        }
    }
}

/// Entries needing a field, minus blank releases which are settled locally.
fn inputs_where(items: &[BacklogItem], needed: impl Fn(&BacklogItem) -> bool) -> Vec<BatchInput> {
    items
        .iter()
        .filter(|i| !i.release.content.trim().is_empty() && needed(i))
        .map(|i| BatchInput {
            id: i.entry.id,
            content: i.release.content.clone(),
        })
        .collect()
}

/// Items of a successful batch; a failed batch charges every requested entry.
fn accept<T>(
    result: BatchResult<T>,
    inputs: &[BatchInput],
    kind: &str,
    failures: &mut Failures,
) -> Option<HashMap<i64, T>> {
    if result.status != BatchStatus::Success {
        let error = result
            .error
            .unwrap_or_else(|| format!("{kind} batch failed"));
        warn!(kind, entries = inputs.len(), error = %error, "AI batch failed");
        for input in inputs {
            failures.insert(input.id, error.clone());
        }
        return None;
    }
    for input in inputs.iter().filter(|i| !result.items.contains_key(&i.id)) {
        failures.insert(input.id, format!("no {kind} returned for entry"));
    }
    Some(result.items)
}

#[cfg(test)]
mod tests {
    use changewire_bus::mock::RecordingPublisher;
    use changewire_bus::topics::RELEASE_PUBLISHED;
    use changewire_core::{BacklogEntry, NewRelease, ReleaseTagKind, SourceKind, SourceMetadata};
    use changewire_llm::provider::mock::ScriptedProvider;
    use changewire_llm::{GatewaySettings, LlmGateway, LlmProvider, RateGate};
    use changewire_storage::MemoryStore;

    use super::*;

    fn settings(max_retries: u32) -> BacklogConfig {
        BacklogConfig {
            batch_size: 10,
            min_pending: 1,
            min_interval_minutes: 60,
            max_retries,
        }
    }

    fn open_gate() -> RateGate {
        RateGate::new(Duration::ZERO, 100)
    }

    fn processor(
        store: &Arc<MemoryStore>,
        provider: Option<Arc<ScriptedProvider>>,
        gate: RateGate,
        bus: &Arc<RecordingPublisher>,
        config: BacklogConfig,
    ) -> BacklogProcessor {
        let gateway = LlmGateway::new(
            provider.map(|p| p as Arc<dyn LlmProvider>),
            Arc::new(gate),
            GatewaySettings::default(),
        );
        BacklogProcessor::new(
            store.clone(),
            Arc::new(gateway),
            ReleasePublisher::new(bus.clone(), RELEASE_PUBLISHED),
            config,
        )
    }

    /// Records one release per content string and returns their backlog ids.
    async fn seed(store: &MemoryStore, contents: &[&str]) -> Vec<i64> {
        let source = store
            .add_source("Spring Boot", SourceKind::Github, SourceMetadata::default())
            .await;
        let mut ids = Vec::new();
        for (n, content) in contents.iter().enumerate() {
            let recorded = store
                .record_release(
                    &NewRelease {
                        tech_stack_id: source.tech_stack_id,
                        version: format!("3.{n}.0"),
                        title: format!("v3.{n}.0"),
                        content: content.to_string(),
                        published_at: None,
                        source_url: None,
                    },
                    &[ReleaseTagKind::Fix],
                )
                .await
                .unwrap()
                .unwrap();
            ids.push(recorded.backlog.unwrap().id);
        }
        ids
    }

    fn translations(ids: &[i64]) -> String {
        let items: Vec<String> = ids
            .iter()
            .map(|id| format!(r#"{{"id": {id}, "translated": " 번역 {id} "}}"#))
            .collect();
        format!("[{}]", items.join(","))
    }

    fn insights(ids: &[i64]) -> String {
        let items: Vec<String> = ids
            .iter()
            .map(|id| {
                format!(
                    r#"{{"id": {id}, "shortSummary": "summary {id}", "insights": [{{"type": "FIX", "title": "t", "reason": "r"}}], "technicalKeywords": ["jdk"]}}"#
                )
            })
            .collect();
        format!("[{}]", items.join(","))
    }

    fn answering(ids: &[i64]) -> ScriptedProvider {
        ScriptedProvider::new()
            .reply(translations(ids))
            .reply(insights(ids))
    }

    async fn entry(store: &MemoryStore, id: i64) -> BacklogEntry {
        store.get_backlog(id).await.unwrap().unwrap()
    }

    fn report(outcome: CycleOutcome) -> CycleReport {
        match outcome {
            CycleOutcome::Completed(report) => report,
            other => panic!("expected a completed cycle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cycle_enriches_and_publishes() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(RecordingPublisher::new());
        let ids = seed(&store, &["Fixed a bug", "Added feature"]).await;
        let provider = Arc::new(answering(&ids));
        let processor = processor(&store, Some(provider.clone()), open_gate(), &bus, settings(3));

        let report = report(processor.run_cycle().await.unwrap());
        assert_eq!(report.pending, 2);
        assert_eq!(report.loaded, 2);
        assert_eq!(report.done, 2);
        assert_eq!(report.published, 2);
        assert_eq!(provider.calls(), 2);

        for id in &ids {
            let entry = entry(&store, *id).await;
            assert_eq!(entry.status, BacklogStatus::Done);
            let release = store.get_release(entry.release_id).await.unwrap().unwrap();
            assert_eq!(release.content_translated, Some(format!("번역 {id}")));
            assert_eq!(release.short_summary, Some(format!("summary {id}")));
        }

        let events = bus.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].key(), "Spring Boot");
        assert_eq!(events[0].payload.tags[0].kind, ReleaseTagKind::Fix);
        assert_eq!(events[0].payload.technical_keywords, vec!["jdk".to_string()]);
        assert_eq!(processor.run_cycle().await.unwrap(), CycleOutcome::Idle);
    }

    #[tokio::test]
    async fn test_quota_exhausted_rolls_back_without_retry() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(RecordingPublisher::new());
        let ids = seed(&store, &["one", "two"]).await;
        let provider = Arc::new(ScriptedProvider::new());
        let processor = processor(
            &store,
            Some(provider.clone()),
            RateGate::new(Duration::ZERO, 0),
            &bus,
            settings(3),
        );

        assert_eq!(
            processor.run_cycle().await.unwrap(),
            CycleOutcome::Aborted {
                status: BatchStatus::SkippedQuota,
                rolled_back: 2
            }
        );
        assert_eq!(provider.calls(), 0);
        for id in ids {
            let entry = entry(&store, id).await;
            assert_eq!(entry.status, BacklogStatus::Pending);
            assert_eq!(entry.retry_count, 0);
        }
    }

    #[tokio::test]
    async fn test_quota_hit_between_calls_keeps_translation() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(RecordingPublisher::new());
        let ids = seed(&store, &["one"]).await;
        let provider = Arc::new(ScriptedProvider::new().reply(translations(&ids)));
        let processor = processor(
            &store,
            Some(provider),
            RateGate::new(Duration::ZERO, 1),
            &bus,
            settings(3),
        );

        assert_eq!(
            processor.run_cycle().await.unwrap(),
            CycleOutcome::Aborted {
                status: BatchStatus::SkippedQuota,
                rolled_back: 1
            }
        );
        let entry = entry(&store, ids[0]).await;
        assert_eq!(entry.status, BacklogStatus::Pending);
        assert_eq!(entry.retry_count, 0);
        let release = store.get_release(entry.release_id).await.unwrap().unwrap();
        assert_eq!(release.content_translated, Some(format!("번역 {}", ids[0])));
        assert!(release.needs_insights());
        assert!(bus.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_aborts_cycle() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(RecordingPublisher::new());
        let ids = seed(&store, &["notes"]).await;
        let processor = processor(&store, None, open_gate(), &bus, settings(3));

        assert!(matches!(
            processor.run_cycle().await.unwrap(),
            CycleOutcome::Aborted {
                status: BatchStatus::SkippedNoKey,
                rolled_back: 1
            }
        ));
        assert_eq!(entry(&store, ids[0]).await.status, BacklogStatus::Pending);
    }

    #[tokio::test]
    async fn test_interrupted_gate_rolls_back() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(RecordingPublisher::new());
        let ids = seed(&store, &["notes"]).await;
        let gate = open_gate();
        gate.interrupt();
        let processor = processor(
            &store,
            Some(Arc::new(ScriptedProvider::new())),
            gate,
            &bus,
            settings(3),
        );

        assert!(matches!(
            processor.run_cycle().await.unwrap(),
            CycleOutcome::Aborted {
                status: BatchStatus::Failed,
                rolled_back: 1
            }
        ));
        let entry = entry(&store, ids[0]).await;
        assert_eq!(entry.status, BacklogStatus::Pending);
        assert_eq!(entry.retry_count, 0);
    }

    #[tokio::test]
    async fn test_unexpected_id_charges_one_retry() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(RecordingPublisher::new());
        let ids = seed(&store, &["first", "second"]).await;
        let answer = format!(
            r#"[{{"id": {}, "translated": "하나"}}, {{"id": 99999, "translated": "가짜"}}]"#,
            ids[0]
        );
        let provider = Arc::new(ScriptedProvider::new().reply(answer).reply(insights(&ids)));
        let processor = processor(&store, Some(provider), open_gate(), &bus, settings(3));

        let report = report(processor.run_cycle().await.unwrap());
        assert_eq!(report.done, 1);
        assert_eq!(report.retried, 1);

        assert_eq!(entry(&store, ids[0]).await.status, BacklogStatus::Done);
        let second = entry(&store, ids[1]).await;
        assert_eq!(second.status, BacklogStatus::Pending);
        assert_eq!(second.retry_count, 1);
        assert!(second.last_error.is_some());
        // Insights of the retried entry are kept for the next attempt.
        let release = store.get_release(second.release_id).await.unwrap().unwrap();
        assert!(release.needs_translation());
        assert!(!release.needs_insights());
    }

    #[tokio::test]
    async fn test_truncated_answer_gives_partial_credit() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(RecordingPublisher::new());
        let ids = seed(&store, &["a", "b", "c", "d"]).await;
        let answer = format!(
            r#"[{{"id": {}, "translated": "A"}}, {{"id": {}, "translated": "B"}}, {{"id": {}, "translated": "C"}}, {{"id": {}, "transl"#,
            ids[0], ids[1], ids[2], ids[3]
        );
        let provider = Arc::new(ScriptedProvider::new().reply(answer).reply(insights(&ids)));
        let processor = processor(&store, Some(provider), open_gate(), &bus, settings(3));

        let report = report(processor.run_cycle().await.unwrap());
        assert_eq!(report.done, 3);
        assert_eq!(report.retried, 1);
        assert_eq!(entry(&store, ids[3]).await.retry_count, 1);
    }

    #[tokio::test]
    async fn test_failed_batches_exhaust_retries() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(RecordingPublisher::new());
        let ids = seed(&store, &["notes"]).await;
        let provider = Arc::new(
            ScriptedProvider::new()
                .fail(500)
                .reply("not json")
                .fail(502)
                .reply("still not json"),
        );
        let processor = processor(&store, Some(provider.clone()), open_gate(), &bus, settings(2));

        let first = report(processor.run_cycle_forced().await.unwrap());
        assert_eq!(first.retried, 1);
        let after_first = entry(&store, ids[0]).await;
        assert_eq!(after_first.status, BacklogStatus::Pending);
        assert_eq!(after_first.retry_count, 1);

        let second = report(processor.run_cycle_forced().await.unwrap());
        assert_eq!(second.failed, 1);
        let failed = entry(&store, ids[0]).await;
        assert_eq!(failed.status, BacklogStatus::Failed);
        assert_eq!(failed.retry_count, 2);

        // Terminal entries are never claimed again.
        assert_eq!(processor.run_cycle_forced().await.unwrap(), CycleOutcome::Idle);
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn test_blank_content_skips_gateway() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(RecordingPublisher::new());
        let ids = seed(&store, &["   "]).await;
        let provider = Arc::new(ScriptedProvider::new());
        let processor = processor(&store, Some(provider.clone()), open_gate(), &bus, settings(3));

        let report = report(processor.run_cycle().await.unwrap());
        assert_eq!(report.done, 1);
        assert_eq!(provider.calls(), 0);
        assert_eq!(entry(&store, ids[0]).await.status, BacklogStatus::Done);

        let events = bus.events();
        assert_eq!(events[0].payload.content_translated.as_deref(), Some(""));
        assert!(events[0].payload.insights.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_still_marks_done() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(RecordingPublisher::new());
        let ids = seed(&store, &["notes"]).await;
        let processor = processor(
            &store,
            Some(Arc::new(answering(&ids))),
            open_gate(),
            &bus,
            settings(3),
        );
        bus.set_failing(true);

        let report = report(processor.run_cycle().await.unwrap());
        assert_eq!(report.done, 1);
        assert_eq!(report.published, 0);
        assert_eq!(entry(&store, ids[0]).await.status, BacklogStatus::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_queue_waits_for_interval() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(RecordingPublisher::new());
        let ids = seed(&store, &["one", "two"]).await;
        let provider = Arc::new(
            ScriptedProvider::new()
                .reply(translations(&ids[..1]))
                .reply(insights(&ids[..1]))
                .reply(translations(&ids[1..]))
                .reply(insights(&ids[1..])),
        );
        let config = BacklogConfig {
            batch_size: 1,
            min_pending: 5,
            ..settings(3)
        };
        let processor = processor(&store, Some(provider), open_gate(), &bus, config);

        // The first cycle never waits.
        assert_eq!(report(processor.run_cycle().await.unwrap()).done, 1);
        assert_eq!(
            processor.run_cycle().await.unwrap(),
            CycleOutcome::NotReady { pending: 1 }
        );

        tokio::time::advance(Duration::from_secs(60 * 60)).await;
        assert_eq!(report(processor.run_cycle().await.unwrap()).done, 1);
        assert_eq!(entry(&store, ids[1]).await.status, BacklogStatus::Done);
    }
}

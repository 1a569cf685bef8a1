//! Batched AI calls for the translation backlog.
//!
//! One call handles a whole batch keyed by backlog id. Each call is admitted
//! by the shared [`RateGate`] and, when a recorder is attached, logged as an
//! AI request row.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use changewire_core::config::LlmConfig;
use changewire_core::{AiRequestOutcome, AiRequestStatus, AiRequestType, InsightPayload, NewAiRequest};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::gate::{GateResult, RateGate};
use crate::parse::{item_id, parse_array};
use crate::prompt;
use crate::provider::{LlmProvider, Message};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchInput {
    /// Backlog entry id; the model echoes it back.
    pub id: i64,
    pub content: String,
}

/// Error text of a batch whose gate wait was interrupted.
pub const INTERRUPTED: &str = "interrupted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Success,
    SkippedNoKey,
    SkippedQuota,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult<T> {
    pub status: BatchStatus,
    pub items: HashMap<i64, T>,
    pub error: Option<String>,
}

impl<T> BatchResult<T> {
    pub fn success(items: HashMap<i64, T>) -> Self {
        Self {
            status: BatchStatus::Success,
            items,
            error: None,
        }
    }

    pub fn skipped(status: BatchStatus) -> Self {
        Self {
            status,
            items: HashMap::new(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: BatchStatus::Failed,
            items: HashMap::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.status == BatchStatus::Failed && self.error.as_deref() == Some(INTERRUPTED)
    }

    /// No key, no quota or shutdown: the whole backlog cycle has to stop.
    pub fn aborts_cycle(&self) -> bool {
        matches!(self.status, BatchStatus::SkippedNoKey | BatchStatus::SkippedQuota)
            || self.is_interrupted()
    }
}

pub type TranslationBatch = BatchResult<String>;
pub type InsightBatch = BatchResult<InsightPayload>;

#[async_trait]
pub trait AiGateway: Send + Sync {
    async fn translate_batch(&self, inputs: &[BatchInput]) -> TranslationBatch;

    async fn extract_insights_batch(&self, inputs: &[BatchInput]) -> InsightBatch;
}

/// Sink for AI request log rows. Implementations swallow their own errors.
#[async_trait]
pub trait RequestRecorder: Send + Sync {
    async fn started(&self, request: &NewAiRequest) -> Option<i64>;

    async fn finished(&self, id: i64, outcome: &AiRequestOutcome);
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub language: String,
}

impl GatewaySettings {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            language: config.translation_language.clone(),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 8192,
            language: "Korean".to_string(),
        }
    }
}

pub struct LlmGateway {
    provider: Option<Arc<dyn LlmProvider>>,
    gate: Arc<RateGate>,
    recorder: Option<Arc<dyn RequestRecorder>>,
    settings: GatewaySettings,
}

type BuildPrompt = fn(&str, &[(i64, &str)]) -> Result<Vec<Message>, serde_json::Error>;

fn translation_item(value: &Value) -> Option<String> {
    value
        .get("translated")?
        .as_str()
        .map(|t| t.trim().to_string())
}

fn insight_item(value: &Value) -> Option<InsightPayload> {
    serde_json::from_value(value.clone()).ok()
}

impl LlmGateway {
    pub fn new(
        provider: Option<Arc<dyn LlmProvider>>,
        gate: Arc<RateGate>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            provider,
            gate,
            recorder: None,
            settings,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn RequestRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    async fn run<T: Send>(
        &self,
        request_type: AiRequestType,
        inputs: &[BatchInput],
        build_prompt: BuildPrompt,
        read_item: fn(&Value) -> Option<T>,
    ) -> BatchResult<T> {
        if inputs.is_empty() {
            return BatchResult::success(HashMap::new());
        }
        let Some(provider) = &self.provider else {
            debug!(kind = request_type.as_str(), "No AI provider key configured");
            return BatchResult::skipped(BatchStatus::SkippedNoKey);
        };

        match self.gate.acquire().await {
            GateResult::Ok => {}
            GateResult::QuotaExceeded => return BatchResult::skipped(BatchStatus::SkippedQuota),
            GateResult::Interrupted => return BatchResult::failed(INTERRUPTED),
        }

        let items: Vec<(i64, &str)> = inputs.iter().map(|i| (i.id, i.content.as_str())).collect();
        let messages = match build_prompt(&self.settings.language, &items) {
            Ok(m) => m,
            Err(e) => return BatchResult::failed(format!("prompt encoding failed: {e}")),
        };
        let input_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();

        let log_id = match &self.recorder {
            Some(recorder) => {
                recorder
                    .started(&NewAiRequest {
                        provider: provider.provider_name().to_string(),
                        model: provider.model().to_string(),
                        request_type,
                        batch_size: inputs.len() as u32,
                        input_chars: input_chars as u64,
                    })
                    .await
            }
            None => None,
        };

        let started = Instant::now();
        let response = provider
            .complete(messages, self.settings.temperature, self.settings.max_tokens)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (result, output_chars) = match response {
            Ok(text) => (collect(&text, inputs, read_item), text.chars().count() as u64),
            Err(e) => {
                warn!(kind = request_type.as_str(), error = %e, "AI request failed");
                (BatchResult::failed(e.to_string()), 0)
            }
        };

        if let (Some(recorder), Some(id)) = (&self.recorder, log_id) {
            let status = if result.status == BatchStatus::Success {
                AiRequestStatus::Success
            } else {
                AiRequestStatus::Failed
            };
            recorder
                .finished(
                    id,
                    &AiRequestOutcome {
                        status,
                        output_chars,
                        duration_ms,
                        error_message: result.error.clone(),
                    },
                )
                .await;
        }

        info!(
            kind = request_type.as_str(),
            requested = inputs.len(),
            returned = result.items.len(),
            duration_ms,
            "AI batch finished"
        );
        result
    }
}

/// Map the parsed answer onto the requested ids.
fn collect<T>(raw: &str, inputs: &[BatchInput], read_item: fn(&Value) -> Option<T>) -> BatchResult<T> {
    let Some(parsed) = parse_array(raw) else {
        return BatchResult::failed("invalid json response");
    };
    if parsed.recovered {
        warn!(kept = parsed.items.len(), "Recovered partial JSON array from AI response");
    }

    let expected: HashSet<i64> = inputs.iter().map(|i| i.id).collect();
    let mut items = HashMap::new();
    for value in &parsed.items {
        let Some(id) = item_id(value) else {
            debug!("Skipping AI item without id");
            continue;
        };
        if !expected.contains(&id) {
            warn!(id, "Ignoring AI item with unexpected id");
            continue;
        }
        match read_item(value) {
            Some(item) => {
                items.entry(id).or_insert(item);
            }
            None => debug!(id, "Skipping AI item with missing fields"),
        }
    }

    if items.is_empty() {
        return BatchResult::failed("no valid items in response");
    }
    BatchResult::success(items)
}

#[async_trait]
impl AiGateway for LlmGateway {
    async fn translate_batch(&self, inputs: &[BatchInput]) -> TranslationBatch {
        self.run(AiRequestType::Translation, inputs, prompt::translation, translation_item)
            .await
    }

    async fn extract_insights_batch(&self, inputs: &[BatchInput]) -> InsightBatch {
        self.run(AiRequestType::Insight, inputs, prompt::insights, insight_item)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::provider::mock::ScriptedProvider;

    #[derive(Default)]
    struct Recorded {
        started: Mutex<Vec<NewAiRequest>>,
        finished: Mutex<Vec<(i64, AiRequestOutcome)>>,
    }

    #[async_trait]
    impl RequestRecorder for Recorded {
        async fn started(&self, request: &NewAiRequest) -> Option<i64> {
            let mut started = self.started.lock().unwrap();
            started.push(request.clone());
            Some(started.len() as i64)
        }

        async fn finished(&self, id: i64, outcome: &AiRequestOutcome) {
            self.finished.lock().unwrap().push((id, outcome.clone()));
        }
    }

    fn inputs(ids: &[i64]) -> Vec<BatchInput> {
        ids.iter()
            .map(|&id| BatchInput {
                id,
                content: format!("notes {id}"),
            })
            .collect()
    }

    fn gateway(provider: ScriptedProvider, daily_cap: u32) -> (LlmGateway, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let gate = Arc::new(RateGate::new(Duration::from_millis(1), daily_cap));
        let gw = LlmGateway::new(
            Some(provider.clone() as Arc<dyn LlmProvider>),
            gate,
            GatewaySettings::default(),
        );
        (gw, provider)
    }

    #[tokio::test]
    async fn test_translation_trims_and_drops_unexpected_ids() {
        let (gw, _) = gateway(
            ScriptedProvider::new().reply(
                r#"Here you go: [{"id": 1, "translated": "  안녕  "}, {"id": 99, "translated": "x"}, {"id": 2}]"#,
            ),
            10,
        );
        let result = gw.translate_batch(&inputs(&[1, 2])).await;
        assert_eq!(result.status, BatchStatus::Success);
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[&1], "안녕");
    }

    #[tokio::test]
    async fn test_insights_require_short_summary() {
        let (gw, _) = gateway(
            ScriptedProvider::new().reply(
                r#"[{"id": 5, "shortSummary": "Faster builds", "insights": [{"type": "PERFORMANCE", "title": "t", "reason": "r"}], "technicalKeywords": ["cache"]},
                    {"id": 6, "insights": []}]"#,
            ),
            10,
        );
        let result = gw.extract_insights_batch(&inputs(&[5, 6])).await;
        assert_eq!(result.status, BatchStatus::Success);
        assert_eq!(result.items.len(), 1);
        let payload = &result.items[&5];
        assert_eq!(payload.short_summary, "Faster builds");
        assert_eq!(payload.insights[0].kind, "PERFORMANCE");
        assert!(payload.migration_guide.is_none());
    }

    #[tokio::test]
    async fn test_unparseable_answer_fails_batch() {
        let (gw, _) = gateway(ScriptedProvider::new().reply("Sorry, I can't."), 10);
        let result = gw.translate_batch(&inputs(&[1])).await;
        assert_eq!(result.status, BatchStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("invalid json response"));

        let (gw, _) = gateway(ScriptedProvider::new().reply(r#"[{"id": 42, "translated": "x"}]"#), 10);
        let result = gw.translate_batch(&inputs(&[1])).await;
        assert_eq!(result.status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_provider_skips_without_gate_slot() {
        let gate = Arc::new(RateGate::new(Duration::from_millis(1), 1));
        let gw = LlmGateway::new(None, gate.clone(), GatewaySettings::default());
        let result = gw.translate_batch(&inputs(&[1])).await;
        assert_eq!(result.status, BatchStatus::SkippedNoKey);
        assert!(result.aborts_cycle());
        assert_eq!(gate.used_today().await, 0);
    }

    #[tokio::test]
    async fn test_interrupted_gate_aborts_cycle() {
        let provider = Arc::new(ScriptedProvider::new().reply("[]").reply("[]"));
        let gate = Arc::new(RateGate::new(Duration::from_secs(60), 10));
        let gw = LlmGateway::new(
            Some(provider.clone() as Arc<dyn LlmProvider>),
            gate.clone(),
            GatewaySettings::default(),
        );
        gw.translate_batch(&inputs(&[1])).await;
        gate.interrupt();

        let result = gw.translate_batch(&inputs(&[1])).await;
        assert!(result.is_interrupted());
        assert!(result.aborts_cycle());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_quota_exceeded_skips_call() {
        let (gw, provider) = gateway(ScriptedProvider::new().reply("[]"), 0);
        let result = gw.extract_insights_batch(&inputs(&[1])).await;
        assert_eq!(result.status, BatchStatus::SkippedQuota);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_request_log_rows() {
        let recorder = Arc::new(Recorded::default());
        let (gw, _) = gateway(
            ScriptedProvider::new()
                .reply(r#"[{"id": 1, "translated": "ok"}]"#)
                .fail(503),
            10,
        );
        let gw = gw.with_recorder(recorder.clone());

        gw.translate_batch(&inputs(&[1, 2])).await;
        let failed = gw.translate_batch(&inputs(&[3])).await;
        assert_eq!(failed.status, BatchStatus::Failed);

        let started = recorder.started.lock().unwrap();
        assert_eq!(started.len(), 2);
        assert_eq!(started[0].provider, "scripted");
        assert_eq!(started[0].request_type, AiRequestType::Translation);
        assert_eq!(started[0].batch_size, 2);
        assert!(started[0].input_chars > 0);

        let finished = recorder.finished.lock().unwrap();
        assert_eq!(finished[0].1.status, AiRequestStatus::Success);
        assert_eq!(finished[1].1.status, AiRequestStatus::Failed);
        assert!(finished[1].1.error_message.as_deref().unwrap().contains("503"));
    }
}

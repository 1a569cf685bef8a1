use std::sync::Arc;

use async_trait::async_trait;
use changewire_core::{AiRequestOutcome, NewAiRequest};
use changewire_llm::RequestRecorder;
use changewire_storage::ReleaseStore;
use tracing::warn;

/// Writes AI request log rows to the release store. Failures are only logged.
pub struct StoreRequestRecorder {
    store: Arc<dyn ReleaseStore>,
}

impl StoreRequestRecorder {
    pub fn new(store: Arc<dyn ReleaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestRecorder for StoreRequestRecorder {
    async fn started(&self, request: &NewAiRequest) -> Option<i64> {
        match self.store.log_ai_request(request).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, kind = request.request_type.as_str(), "Could not log AI request");
                None
            }
        }
    }

    async fn finished(&self, id: i64, outcome: &AiRequestOutcome) {
        if let Err(e) = self.store.complete_ai_request(id, outcome).await {
            warn!(error = %e, request_id = id, "Could not complete AI request log");
        }
    }
}

pub mod gemini;
pub mod ollama;
pub mod openai;

use changewire_core::config::LlmConfig;
use reqwest::Client;

use crate::provider::{LlmError, LlmProvider};

/// Create the configured LLM provider.
///
/// A hosted provider without an API key yields `Ok(None)`: the gateway then
/// reports every batch as skipped instead of failing.
pub fn create_provider(
    llm_config: &LlmConfig,
    client: Client,
) -> Result<Option<Box<dyn LlmProvider>>, LlmError> {
    match llm_config.provider.as_str() {
        "gemini" => Ok(llm_config.gemini_api_key.as_ref().map(|api_key| {
            Box::new(gemini::GeminiProvider::new(
                client,
                api_key.clone(),
                llm_config.gemini_model.clone(),
            )) as Box<dyn LlmProvider>
        })),
        "openai" => {
            let base_url = llm_config
                .openai_base_url
                .as_deref()
                .unwrap_or("https://api.openai.com");
            Ok(llm_config.openai_api_key.as_ref().map(|api_key| {
                Box::new(openai::OpenAiProvider::new(
                    client,
                    api_key.clone(),
                    llm_config.openai_model.clone(),
                    base_url.to_string(),
                )) as Box<dyn LlmProvider>
            }))
        }
        "ollama" => Ok(Some(Box::new(ollama::OllamaProvider::new(
            client,
            llm_config.ollama_url.clone(),
            llm_config.ollama_model.clone(),
        )))),
        other => Err(LlmError::NotConfigured(format!(
            "unknown LLM provider: '{}'",
            other
        ))),
    }
}

pub mod gate;
pub mod gateway;
pub mod parse;
pub mod prompt;
pub mod provider;
pub mod providers;

pub use gate::{GateResult, RateGate};
pub use gateway::{
    AiGateway, BatchInput, BatchResult, BatchStatus, GatewaySettings, InsightBatch, LlmGateway,
    RequestRecorder, TranslationBatch, INTERRUPTED,
};
pub use provider::{LlmError, LlmProvider, Message, Role};
pub use providers::create_provider;

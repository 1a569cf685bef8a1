//! Translation and insight backlog: batches pending releases through the AI
//! gateway and publishes the enriched release events.

pub mod error;
pub mod event;
pub mod processor;
pub mod recorder;

pub use error::BacklogError;
pub use event::release_event;
pub use processor::{BacklogProcessor, CycleOutcome, CycleReport};
pub use recorder::StoreRequestRecorder;

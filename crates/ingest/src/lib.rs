//! Release ingestion: turning upstream version listings into recorded
//! releases and backlog entries, plus catalog sync of tracked sources.

pub mod engine;
pub mod error;
pub mod sync;

pub use engine::{CrawlReport, IngestOutcome, IngestionEngine};
pub use error::IngestError;
pub use sync::CatalogSync;

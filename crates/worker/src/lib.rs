//! Background worker: wires the pipeline together and drives the crawl and
//! backlog schedulers.

pub mod pipeline;
pub mod schedule;

pub use pipeline::Pipeline;
pub use schedule::{parse_cron, run_cron, SingleFlight};

pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod tags;

pub use config::Config;
pub use error::*;
pub use event::*;
pub use model::*;
pub use tags::extract_tags;

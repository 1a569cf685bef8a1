//! Upstream version sources and release detail lookup.
//!
//! The HTTP adapters (`github`, `maven`, `npm`, `feed`) never fail outward:
//! every network or decode problem is logged and collapses into "nothing
//! found", which the resolver and detail fetcher treat as routine.

pub mod catalog;
pub mod detail;
pub mod error;
pub mod feed;
pub mod github;
pub mod http;
pub mod maven;
pub mod npm;
pub mod resolver;
pub mod upstream;

pub use catalog::{CatalogClient, SourceCatalog};
pub use detail::{tag_candidates, DetailFetcher, ReleaseDetail};
pub use error::SourceError;
pub use feed::FeedEntry;
pub use resolver::{
    Candidate, DetailSource, Resolution, ResolvedSource, SkipReason, SourceResolver, VersionSource,
};
pub use upstream::{HttpUpstream, Upstream};

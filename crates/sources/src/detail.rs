//! Release detail lookup for a resolved version.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::feed::FeedEntry;
use crate::resolver::{Candidate, DetailSource};
use crate::upstream::Upstream;

/// Human-readable notes of one release.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseDetail {
    pub title: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

impl ReleaseDetail {
    /// Placeholder detail for sources that only know the version string.
    pub fn version_only(version: &str) -> Self {
        Self {
            title: version.to_string(),
            content: String::new(),
            published_at: None,
            url: None,
        }
    }

    pub fn from_feed(entry: &FeedEntry) -> Self {
        Self {
            title: entry.title.clone(),
            content: entry.content.clone(),
            published_at: entry.published_at,
            url: entry.link.clone(),
        }
    }
}

/// Tag names to try for a version, in order: the literal, then the literal
/// with its `v`/`V` prefix toggled.
pub fn tag_candidates(version: &str) -> Vec<String> {
    let trimmed = version.trim();
    let literal = trimmed.strip_prefix("refs/tags/").unwrap_or(trimmed);
    if literal.is_empty() {
        return Vec::new();
    }

    let toggled = match literal.strip_prefix(['v', 'V']) {
        Some(rest) => rest.to_string(),
        None => format!("v{literal}"),
    };

    let mut candidates = vec![literal.to_string()];
    if !toggled.is_empty() && toggled != literal {
        candidates.push(toggled);
    }
    candidates
}

pub struct DetailFetcher {
    upstream: Arc<dyn Upstream>,
}

impl DetailFetcher {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self { upstream }
    }

    /// Release notes for one candidate, or `None` when nothing can be found.
    pub async fn fetch(&self, details: &DetailSource, candidate: &Candidate) -> Option<ReleaseDetail> {
        match details {
            DetailSource::Inline => candidate.detail.clone(),
            DetailSource::VersionOnly => Some(ReleaseDetail::version_only(&candidate.version)),
            DetailSource::Vcs { owner, repo } => {
                for tag in tag_candidates(&candidate.version) {
                    if let Some(mut detail) = self.upstream.fetch_release_detail(owner, repo, &tag).await {
                        if detail.title.trim().is_empty() {
                            detail.title = candidate.version.clone();
                        }
                        return Some(detail);
                    }
                }
                debug!(owner, repo, version = %candidate.version, "No release detail under any tag variant");
                None
            }
        }
    }
}

//! Source Resolver: picks the adapter for a tracked source and produces its
//! candidate versions.
//!
//! Policy:
//! 1. Feed sources read their entries directly; entries are both version and notes.
//! 2. With GitHub coordinates, the tag lister is tried first and wins when it
//!    returns anything.
//! 3. Otherwise the source kind decides: Maven metadata or the npm registry.
//!    Details for those versions come from GitHub when coordinates exist;
//!    npm without them records version-only releases, Maven without them is
//!    skipped.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use changewire_core::{keys, SourceKind, TechStackSource};

use crate::detail::ReleaseDetail;
use crate::upstream::Upstream;

/// Where candidate versions were listed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSource {
    Vcs { owner: String, repo: String },
    Registry { group: String, artifact: String },
    Package { name: String },
    Feed { url: String },
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSource::Vcs { owner, repo } => write!(f, "github:{owner}/{repo}"),
            VersionSource::Registry { group, artifact } => write!(f, "maven:{group}:{artifact}"),
            VersionSource::Package { name } => write!(f, "npm:{name}"),
            VersionSource::Feed { url } => write!(f, "feed:{url}"),
        }
    }
}

/// How release notes are obtained for each candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailSource {
    /// GitHub release lookup by tag.
    Vcs { owner: String, repo: String },
    /// Carried on the candidate itself (feeds).
    Inline,
    /// Title is the version, no notes.
    VersionOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub version: String,
    pub detail: Option<ReleaseDetail>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    pub listed_from: VersionSource,
    pub details: DetailSource,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingCoordinates(&'static str),
    NoDetailSource,
    NoVersions,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingCoordinates(what) => write!(f, "missing coordinates: {what}"),
            SkipReason::NoDetailSource => f.write_str("no release-note source for listed versions"),
            SkipReason::NoVersions => f.write_str("no versions found upstream"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(ResolvedSource),
    Skipped(SkipReason),
}

/// Trim, drop blanks and remove exact duplicates, keeping first occurrence.
fn dedupe(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter_map(|mut c| {
            c.version = c.version.trim().to_string();
            (!c.version.is_empty() && seen.insert(c.version.clone())).then_some(c)
        })
        .collect()
}

fn listed(versions: Vec<String>) -> Vec<Candidate> {
    versions
        .into_iter()
        .map(|version| Candidate {
            version,
            detail: None,
        })
        .collect()
}

fn finish(listed_from: VersionSource, details: DetailSource, candidates: Vec<Candidate>) -> Resolution {
    let candidates = dedupe(candidates);
    if candidates.is_empty() {
        return Resolution::Skipped(SkipReason::NoVersions);
    }
    debug!(source = %listed_from, count = candidates.len(), "Resolved candidate versions");
    Resolution::Resolved(ResolvedSource {
        listed_from,
        details,
        candidates,
    })
}

pub struct SourceResolver {
    upstream: Arc<dyn Upstream>,
    tag_limit: u32,
    feed_limit: u32,
}

impl SourceResolver {
    pub fn new(upstream: Arc<dyn Upstream>, tag_limit: u32, feed_limit: u32) -> Self {
        Self {
            upstream,
            tag_limit,
            feed_limit,
        }
    }

    pub async fn resolve(&self, source: &TechStackSource) -> Resolution {
        match source.kind {
            SourceKind::Rss => self.resolve_feed(source).await,
            _ => self.resolve_listed(source).await,
        }
    }

    async fn resolve_feed(&self, source: &TechStackSource) -> Resolution {
        let Some(url) = source.feed_url() else {
            return Resolution::Skipped(SkipReason::MissingCoordinates(keys::RSS_URL));
        };
        let candidates = self
            .upstream
            .list_feed_entries(url, self.feed_limit)
            .await
            .iter()
            .map(|entry| Candidate {
                version: entry.version.clone(),
                detail: Some(ReleaseDetail::from_feed(entry)),
            })
            .collect();
        finish(VersionSource::Feed { url: url.to_string() }, DetailSource::Inline, candidates)
    }

    async fn resolve_listed(&self, source: &TechStackSource) -> Resolution {
        let vcs = source.github_coordinates();

        if let Some((owner, repo)) = vcs {
            if let Some(tags) = self.upstream.list_tags(owner, repo, self.tag_limit).await {
                let (owner, repo) = (owner.to_string(), repo.to_string());
                return finish(
                    VersionSource::Vcs {
                        owner: owner.clone(),
                        repo: repo.clone(),
                    },
                    DetailSource::Vcs { owner, repo },
                    listed(tags),
                );
            }
        }

        let vcs_details = vcs.map(|(owner, repo)| DetailSource::Vcs {
            owner: owner.to_string(),
            repo: repo.to_string(),
        });

        match source.kind {
            SourceKind::Maven => {
                let Some((group, artifact)) = source.maven_coordinates() else {
                    return Resolution::Skipped(SkipReason::MissingCoordinates(
                        "maven_group_id/maven_artifact_id",
                    ));
                };
                let Some(details) = vcs_details else {
                    return Resolution::Skipped(SkipReason::NoDetailSource);
                };
                let versions = self
                    .upstream
                    .list_registry_versions(group, artifact)
                    .await
                    .unwrap_or_default();
                finish(
                    VersionSource::Registry {
                        group: group.to_string(),
                        artifact: artifact.to_string(),
                    },
                    details,
                    listed(versions),
                )
            }
            SourceKind::Npm => {
                let Some(name) = source.npm_package() else {
                    return Resolution::Skipped(SkipReason::MissingCoordinates(keys::NPM_PACKAGE_NAME));
                };
                let versions = self
                    .upstream
                    .list_package_versions(name)
                    .await
                    .unwrap_or_default();
                finish(
                    VersionSource::Package {
                        name: name.to_string(),
                    },
                    vcs_details.unwrap_or(DetailSource::VersionOnly),
                    listed(versions),
                )
            }
            SourceKind::Github | SourceKind::Rss => match vcs {
                Some(_) => Resolution::Skipped(SkipReason::NoVersions),
                None => Resolution::Skipped(SkipReason::MissingCoordinates(
                    "github_owner/github_repo",
                )),
            },
        }
    }
}

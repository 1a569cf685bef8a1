use async_trait::async_trait;
use reqwest::Client;

use changewire_core::config::{GithubConfig, RegistryConfig};

use crate::detail::ReleaseDetail;
use crate::error::SourceError;
use crate::feed::{FeedClient, FeedEntry};
use crate::github::GithubClient;
use crate::http::build_client;
use crate::maven::MavenClient;
use crate::npm::NpmClient;

/// Everything the pipeline asks of the outside world about releases.
///
/// Implementations report "nothing found" as `None` or an empty list and
/// never return errors.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn list_tags(&self, owner: &str, repo: &str, limit: u32) -> Option<Vec<String>>;

    async fn list_registry_versions(&self, group: &str, artifact: &str) -> Option<Vec<String>>;

    async fn list_package_versions(&self, name: &str) -> Option<Vec<String>>;

    async fn list_feed_entries(&self, url: &str, limit: u32) -> Vec<FeedEntry>;

    async fn fetch_release_detail(&self, owner: &str, repo: &str, tag: &str)
        -> Option<ReleaseDetail>;
}

/// Production [`Upstream`] backed by the HTTP adapters.
#[derive(Clone)]
pub struct HttpUpstream {
    github: GithubClient,
    maven: MavenClient,
    npm: NpmClient,
    feed: FeedClient,
}

impl HttpUpstream {
    pub fn new(client: Client, github: &GithubConfig, registry: &RegistryConfig) -> Self {
        Self {
            github: GithubClient::new(client.clone(), &github.api_url, github.token.clone()),
            maven: MavenClient::new(client.clone(), &registry.maven_url),
            npm: NpmClient::new(client.clone(), &registry.npm_url),
            feed: FeedClient::new(client),
        }
    }

    pub fn from_config(github: &GithubConfig, registry: &RegistryConfig) -> Result<Self, SourceError> {
        let client = build_client(registry.http_timeout_secs)?;
        Ok(Self::new(client, github, registry))
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn list_tags(&self, owner: &str, repo: &str, limit: u32) -> Option<Vec<String>> {
        self.github.list_tags(owner, repo, limit).await
    }

    async fn list_registry_versions(&self, group: &str, artifact: &str) -> Option<Vec<String>> {
        self.maven.list_versions(group, artifact).await
    }

    async fn list_package_versions(&self, name: &str) -> Option<Vec<String>> {
        self.npm.list_versions(name).await
    }

    async fn list_feed_entries(&self, url: &str, limit: u32) -> Vec<FeedEntry> {
        self.feed.fetch_entries(url, limit).await
    }

    async fn fetch_release_detail(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> Option<ReleaseDetail> {
        self.github.fetch_release(owner, repo, tag).await
    }
}

/// Scripted upstream for exercising the resolver and ingestion without HTTP.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct ScriptedUpstream {
        tags: Mutex<HashMap<(String, String), Vec<String>>>,
        registry: Mutex<HashMap<(String, String), Vec<String>>>,
        packages: Mutex<HashMap<String, Vec<String>>>,
        feeds: Mutex<HashMap<String, Vec<FeedEntry>>>,
        releases: Mutex<HashMap<(String, String, String), ReleaseDetail>>,
        /// Every (owner/repo, tag) release lookup, in call order.
        pub detail_requests: Mutex<Vec<String>>,
        pub listing_calls: AtomicUsize,
    }

    impl ScriptedUpstream {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_tags(self, owner: &str, repo: &str, tags: &[&str]) -> Self {
            self.tags.lock().unwrap().insert(
                (owner.into(), repo.into()),
                tags.iter().map(|t| t.to_string()).collect(),
            );
            self
        }

        pub fn with_registry(self, group: &str, artifact: &str, versions: &[&str]) -> Self {
            self.registry.lock().unwrap().insert(
                (group.into(), artifact.into()),
                versions.iter().map(|v| v.to_string()).collect(),
            );
            self
        }

        pub fn with_package(self, name: &str, versions: &[&str]) -> Self {
            self.packages
                .lock()
                .unwrap()
                .insert(name.into(), versions.iter().map(|v| v.to_string()).collect());
            self
        }

        pub fn with_feed(self, url: &str, entries: Vec<FeedEntry>) -> Self {
            self.feeds.lock().unwrap().insert(url.into(), entries);
            self
        }

        pub fn with_release(self, owner: &str, repo: &str, tag: &str, detail: ReleaseDetail) -> Self {
            self.add_release(owner, repo, tag, detail);
            self
        }

        pub fn add_release(&self, owner: &str, repo: &str, tag: &str, detail: ReleaseDetail) {
            self.releases
                .lock()
                .unwrap()
                .insert((owner.into(), repo.into(), tag.into()), detail);
        }
    }

    #[async_trait]
    impl Upstream for ScriptedUpstream {
        async fn list_tags(&self, owner: &str, repo: &str, limit: u32) -> Option<Vec<String>> {
            self.listing_calls.fetch_add(1, Ordering::SeqCst);
            self.tags
                .lock()
                .unwrap()
                .get(&(owner.to_string(), repo.to_string()))
                .map(|t| t.iter().take(limit as usize).cloned().collect())
        }

        async fn list_registry_versions(&self, group: &str, artifact: &str) -> Option<Vec<String>> {
            self.listing_calls.fetch_add(1, Ordering::SeqCst);
            self.registry
                .lock()
                .unwrap()
                .get(&(group.to_string(), artifact.to_string()))
                .cloned()
        }

        async fn list_package_versions(&self, name: &str) -> Option<Vec<String>> {
            self.listing_calls.fetch_add(1, Ordering::SeqCst);
            self.packages.lock().unwrap().get(name).cloned()
        }

        async fn list_feed_entries(&self, url: &str, limit: u32) -> Vec<FeedEntry> {
            self.listing_calls.fetch_add(1, Ordering::SeqCst);
            self.feeds
                .lock()
                .unwrap()
                .get(url)
                .map(|e| e.iter().take(limit as usize).cloned().collect())
                .unwrap_or_default()
        }

        async fn fetch_release_detail(
            &self,
            owner: &str,
            repo: &str,
            tag: &str,
        ) -> Option<ReleaseDetail> {
            self.detail_requests
                .lock()
                .unwrap()
                .push(format!("{owner}/{repo}@{tag}"));
            self.releases
                .lock()
                .unwrap()
                .get(&(owner.to_string(), repo.to_string(), tag.to_string()))
                .cloned()
        }
    }
}

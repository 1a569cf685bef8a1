//! Maven repository metadata reader.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Client;
use tracing::{debug, warn};

use crate::http::{get_text, join};

static VERSION_TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<version>\s*([^<]*?)\s*</version>").ok());

/// Every `<version>` value in document order.
pub fn parse_metadata_versions(xml: &str) -> Vec<String> {
    let Some(re) = VERSION_TAG.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(xml)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

#[derive(Clone)]
pub struct MavenClient {
    client: Client,
    repo_url: String,
}

impl MavenClient {
    pub fn new(client: Client, repo_url: impl Into<String>) -> Self {
        Self {
            client,
            repo_url: repo_url.into(),
        }
    }

    pub fn metadata_url(&self, group: &str, artifact: &str) -> String {
        join(
            &self.repo_url,
            &format!("{}/{}/maven-metadata.xml", group.replace('.', "/"), artifact),
        )
    }

    pub async fn list_versions(&self, group: &str, artifact: &str) -> Option<Vec<String>> {
        let url = self.metadata_url(group, artifact);
        let xml = match get_text(self.client.get(&url)).await {
            Ok(xml) => xml,
            Err(e) => {
                warn!(group, artifact, error = %e, "Maven metadata fetch failed");
                return None;
            }
        };
        let versions = parse_metadata_versions(&xml);
        if versions.is_empty() {
            debug!(group, artifact, "Maven metadata lists no versions");
            return None;
        }
        Some(versions)
    }
}

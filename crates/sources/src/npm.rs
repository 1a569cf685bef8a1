//! npm registry reader.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::http::{get_json, join};

#[derive(Debug, Deserialize)]
struct PackageDocument {
    #[serde(default)]
    time: serde_json::Map<String, Value>,
}

/// Published versions from a packument's `time` map, oldest first.
fn versions_by_publish_time(time: serde_json::Map<String, Value>) -> Vec<String> {
    let mut versions: Vec<(Option<DateTime<Utc>>, String)> = time
        .into_iter()
        .filter(|(k, _)| k != "created" && k != "modified")
        .map(|(version, published)| {
            let at = published
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc));
            (at, version)
        })
        .collect();
    // Unparseable timestamps sort last.
    versions.sort_by(|a, b| match (a.0, b.0) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.1.cmp(&b.1),
    });
    versions.into_iter().map(|(_, v)| v).collect()
}

#[derive(Clone)]
pub struct NpmClient {
    client: Client,
    registry_url: String,
}

impl NpmClient {
    pub fn new(client: Client, registry_url: impl Into<String>) -> Self {
        Self {
            client,
            registry_url: registry_url.into(),
        }
    }

    pub async fn list_versions(&self, name: &str) -> Option<Vec<String>> {
        // Scoped names keep their '@' but need the slash encoded.
        let url = join(&self.registry_url, &name.replace('/', "%2F"));
        let doc: PackageDocument = match get_json(self.client.get(&url)).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(package = name, error = %e, "npm registry fetch failed");
                return None;
            }
        };
        let versions = versions_by_publish_time(doc.time);
        if versions.is_empty() {
            debug!(package = name, "npm registry lists no versions");
            return None;
        }
        Some(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_versions_sorted_by_publish_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/react"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "react",
                "time": {
                    "created": "2011-10-26T17:46:21.942Z",
                    "modified": "2024-06-01T00:00:00.000Z",
                    "18.3.0": "2024-04-25T00:00:00.000Z",
                    "18.2.0": "2022-06-14T00:00:00.000Z",
                    "19.0.0": "2024-12-05T00:00:00.000Z"
                }
            })))
            .mount(&server)
            .await;

        let npm = NpmClient::new(Client::new(), server.uri());
        assert_eq!(
            npm.list_versions("react").await,
            Some(vec!["18.2.0".to_string(), "18.3.0".to_string(), "19.0.0".to_string()])
        );
    }

    #[tokio::test]
    async fn test_missing_time_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/left-pad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "left-pad"})))
            .mount(&server)
            .await;

        let npm = NpmClient::new(Client::new(), server.uri());
        assert!(npm.list_versions("left-pad").await.is_none());
    }
}

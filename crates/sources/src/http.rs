use std::time::Duration;

use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::SourceError;

pub const USER_AGENT: &str = concat!("changewire/", env!("CARGO_PKG_VERSION"));

/// Shared client for all upstream adapters.
pub fn build_client(timeout_secs: u64) -> Result<Client, SourceError> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()?;
    Ok(client)
}

async fn send(request: RequestBuilder) -> Result<reqwest::Response, SourceError> {
    let start = std::time::Instant::now();
    let response = request.send().await?;
    let url = response.url().to_string();
    let status = response.status();
    trace!(%url, status = status.as_u16(), elapsed_ms = start.elapsed().as_millis() as u64, "Upstream response");
    if !status.is_success() {
        return Err(SourceError::Status {
            status: status.as_u16(),
            url,
        });
    }
    Ok(response)
}

pub async fn get_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, SourceError> {
    let response = send(request).await?;
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()))
}

pub async fn get_text(request: RequestBuilder) -> Result<String, SourceError> {
    let response = send(request).await?;
    Ok(response.text().await?)
}

/// Join a base URL and a path without doubling slashes.
pub fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// `base` extended by `segments`, each percent-encoded as a single path segment.
pub fn url_with_segments(base: &str, segments: &[&str]) -> Result<Url, SourceError> {
    let mut url = Url::parse(base).map_err(|e| SourceError::InvalidUrl(format!("{base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| SourceError::InvalidUrl(format!("{base}: not a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

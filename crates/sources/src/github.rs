//! GitHub REST client: tag listing and release lookup by tag.

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::detail::ReleaseDetail;
use crate::error::SourceError;
use crate::http::{get_json, url_with_segments};

const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Deserialize)]
struct GithubTag {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: Option<String>,
    name: Option<String>,
    body: Option<String>,
    html_url: Option<String>,
    published_at: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|d| d.with_timezone(&Utc))
}

#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    api_url: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(client: Client, api_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            token,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SourceError> {
        url_with_segments(&self.api_url, segments)
    }

    fn get(&self, url: Url) -> RequestBuilder {
        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn try_list_tags(
        &self,
        owner: &str,
        repo: &str,
        limit: u32,
    ) -> Result<Vec<String>, SourceError> {
        let per_page = limit.clamp(1, MAX_PER_PAGE);
        let request = self
            .get(self.endpoint(&["repos", owner, repo, "tags"])?)
            .query(&[("per_page", per_page.to_string()), ("page", "1".to_string())]);
        let tags: Vec<GithubTag> = get_json(request).await?;
        Ok(tags
            .into_iter()
            .filter_map(|t| non_blank(t.name))
            .map(|n| n.trim().to_string())
            .collect())
    }

    /// Most recent tags of a repository; `None` when nothing could be listed.
    pub async fn list_tags(&self, owner: &str, repo: &str, limit: u32) -> Option<Vec<String>> {
        match self.try_list_tags(owner, repo, limit).await {
            Ok(tags) if !tags.is_empty() => Some(tags),
            Ok(_) => {
                debug!(owner, repo, "No tags listed");
                None
            }
            Err(e) => {
                warn!(owner, repo, error = %e, "GitHub tag listing failed");
                None
            }
        }
    }

    async fn try_fetch_release(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> Result<GithubRelease, SourceError> {
        let url = self.endpoint(&["repos", owner, repo, "releases", "tags", tag])?;
        get_json(self.get(url)).await
    }

    /// Release published for exactly `tag`; `None` on 404 or any failure.
    pub async fn fetch_release(&self, owner: &str, repo: &str, tag: &str) -> Option<ReleaseDetail> {
        let release: GithubRelease = match self.try_fetch_release(owner, repo, tag).await {
            Ok(r) => r,
            Err(SourceError::Status { status: 404, .. }) => {
                debug!(owner, repo, tag, "No release for tag");
                return None;
            }
            Err(e) => {
                warn!(owner, repo, tag, error = %e, "GitHub release lookup failed");
                return None;
            }
        };

        let tag_name = non_blank(release.tag_name);
        let url_tag = tag_name.clone().unwrap_or_else(|| tag.to_string());
        let url = non_blank(release.html_url).unwrap_or_else(|| {
            url_with_segments("https://github.com", &[owner, repo, "releases", "tag", &url_tag])
                .map(String::from)
                .unwrap_or_else(|_| format!("https://github.com/{owner}/{repo}/releases/tag/{url_tag}"))
        });

        Some(ReleaseDetail {
            title: non_blank(release.name).or(tag_name).unwrap_or_default(),
            content: release.body.unwrap_or_default(),
            published_at: parse_timestamp(release.published_at.as_deref()),
            url: Some(url),
        })
    }
}

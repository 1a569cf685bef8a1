//! RSS 2.0 / Atom feed reader.
//!
//! Feed entries carry their own release notes, so each entry is both a
//! version candidate and its detail.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::http::get_text;

#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub version: String,
    pub title: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub link: Option<String>,
}

// ── RSS 2.0 ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Rss {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "encoded", alias = "content:encoded")]
    encoded: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

// ── Atom ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    content: Option<AtomText>,
    summary: Option<AtomText>,
    published: Option<String>,
    updated: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn text(node: Option<AtomText>) -> Option<String> {
    non_blank(node.and_then(|n| n.value))
}

/// Derive a version identifier from an entry title.
///
/// Trims, drops a case-insensitive `release ` prefix, then a `v` directly
/// followed by a digit. Blank results yield `None`.
pub fn normalize_version(title: &str) -> Option<String> {
    let mut version = title.trim();
    if version
        .get(..8)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("release "))
    {
        version = version[8..].trim();
    }
    let mut chars = version.chars();
    if let (Some('v' | 'V'), Some(next)) = (chars.next(), chars.next()) {
        if next.is_ascii_digit() {
            version = &version[1..];
        }
    }
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

fn entry(
    title: Option<String>,
    content: Option<String>,
    published_at: Option<DateTime<Utc>>,
    link: Option<String>,
) -> Option<FeedEntry> {
    let title = title?;
    let version = normalize_version(&title)?;
    Some(FeedEntry {
        version,
        title: title.trim().to_string(),
        content: content.unwrap_or_default(),
        published_at,
        link,
    })
}

fn from_rss(rss: Rss, limit: usize) -> Vec<FeedEntry> {
    rss.channel
        .items
        .into_iter()
        .take(limit)
        .filter_map(|item| {
            let published = item
                .pub_date
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
                .map(|d| d.with_timezone(&Utc));
            entry(
                non_blank(item.title),
                non_blank(item.encoded).or(item.description),
                published,
                non_blank(item.link).map(|l| l.trim().to_string()),
            )
        })
        .collect()
}

fn from_atom(feed: AtomFeed, limit: usize) -> Vec<FeedEntry> {
    feed.entries
        .into_iter()
        .take(limit)
        .filter_map(|e| {
            let published = e
                .published
                .or(e.updated)
                .and_then(|d| DateTime::parse_from_rfc3339(d.trim()).ok())
                .map(|d| d.with_timezone(&Utc));
            let link = e
                .links
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
                .or(e.links.first())
                .and_then(|l| l.href.clone());
            entry(text(e.title), text(e.content).or_else(|| text(e.summary)), published, link)
        })
        .collect()
}

/// Parse the first `limit` entries of an RSS or Atom document.
pub fn parse_feed(xml: &str, limit: usize) -> Result<Vec<FeedEntry>, SourceError> {
    match quick_xml::de::from_str::<Rss>(xml) {
        Ok(rss) => Ok(from_rss(rss, limit)),
        Err(rss_err) => match quick_xml::de::from_str::<AtomFeed>(xml) {
            Ok(atom) => Ok(from_atom(atom, limit)),
            Err(atom_err) => Err(SourceError::Decode(format!(
                "not an RSS ({rss_err}) or Atom ({atom_err}) document"
            ))),
        },
    }
}

#[derive(Clone)]
pub struct FeedClient {
    client: Client,
}

impl FeedClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn fetch_entries(&self, url: &str, limit: u32) -> Vec<FeedEntry> {
        if url.trim().is_empty() {
            return Vec::new();
        }
        let xml = match get_text(self.client.get(url.trim())).await {
            Ok(xml) if !xml.trim().is_empty() => xml,
            Ok(_) => return Vec::new(),
            Err(e) => {
                warn!(url, error = %e, "Feed fetch failed");
                return Vec::new();
            }
        };
        match parse_feed(&xml, limit as usize) {
            Ok(entries) => {
                debug!(url, count = entries.len(), "Feed parsed");
                entries
            }
            Err(e) => {
                warn!(url, error = %e, "Feed parse failed");
                Vec::new()
            }
        }
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ── Tracked components ────────────────────────────────────────

/// A named software component whose releases are tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechStack {
    pub id: i64,
    pub name: String,
    /// Last version recorded by a successful ingestion walk.
    pub latest_version: Option<String>,
    pub category: Option<String>,
    pub color_hex: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceKind {
    Github,
    Maven,
    Npm,
    Rss,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Github => "GITHUB",
            SourceKind::Maven => "MAVEN",
            SourceKind::Npm => "NPM",
            SourceKind::Rss => "RSS",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GITHUB" => Ok(SourceKind::Github),
            "MAVEN" => Ok(SourceKind::Maven),
            "NPM" => Ok(SourceKind::Npm),
            "RSS" => Ok(SourceKind::Rss),
            other => Err(CoreError::UnknownSourceKind(other.to_string())),
        }
    }
}

/// Well-known coordinate keys stored in a source's metadata bag.
pub mod keys {
    pub const GITHUB_OWNER: &str = "github_owner";
    pub const GITHUB_REPO: &str = "github_repo";
    pub const MAVEN_GROUP_ID: &str = "maven_group_id";
    pub const MAVEN_ARTIFACT_ID: &str = "maven_artifact_id";
    pub const NPM_PACKAGE_NAME: &str = "npm_package_name";
    pub const RSS_URL: &str = "rss_url";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

impl MetadataEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Incoming metadata pair as delivered by the catalog; either side may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMetadata {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl IncomingMetadata {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: Some(value.into()),
        }
    }
}

fn normalize_key(key: &str) -> Option<String> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Ordered key/value coordinates of a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    entries: Vec<MetadataEntry>,
}

impl SourceMetadata {
    pub fn new(entries: Vec<MetadataEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[MetadataEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive lookup. Blank values count as missing.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key.trim().eq_ignore_ascii_case(key))
            .map(|e| e.value.trim())
            .filter(|v| !v.is_empty())
    }

    /// Merge a fresh set of pairs from the catalog into the stored bag.
    ///
    /// Incoming pairs without key or value are dropped, incoming keys are trimmed
    /// and the last value per key wins. Stored entries are deduplicated by
    /// normalized key (first survives, adopting a later non-empty value when it has
    /// none), then updated in place. New keys are appended and stored keys that
    /// the catalog no longer sends are removed.
    pub fn merge(&mut self, incoming: &[IncomingMetadata]) {
        let mut fresh: Vec<(String, String, String)> = Vec::new();
        for item in incoming {
            let (Some(key), Some(value)) = (item.key.as_deref(), item.value.as_deref()) else {
                continue;
            };
            let Some(norm) = normalize_key(key) else {
                continue;
            };
            match fresh.iter_mut().find(|(n, _, _)| *n == norm) {
                Some(slot) => {
                    slot.1 = key.trim().to_string();
                    slot.2 = value.to_string();
                }
                None => fresh.push((norm, key.trim().to_string(), value.to_string())),
            }
        }

        let mut kept: Vec<(String, MetadataEntry)> = Vec::new();
        for entry in self.entries.drain(..) {
            let Some(norm) = normalize_key(&entry.key) else {
                continue;
            };
            match kept.iter_mut().find(|(n, _)| *n == norm) {
                Some((_, first)) => {
                    if first.value.trim().is_empty() && !entry.value.trim().is_empty() {
                        first.value = entry.value;
                    }
                }
                None => kept.push((norm, entry)),
            }
        }

        let mut merged = Vec::with_capacity(fresh.len());
        for (norm, mut entry) in kept {
            if let Some((_, _, value)) = fresh.iter().find(|(n, _, _)| *n == norm) {
                entry.value = value.clone();
                merged.push((norm, entry));
            }
        }
        for (norm, key, value) in fresh {
            if !merged.iter().any(|(n, _)| *n == norm) {
                merged.push((norm, MetadataEntry::new(key, value)));
            }
        }

        self.entries = merged.into_iter().map(|(_, e)| e).collect();
    }
}

/// One upstream binding for a tracked component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechStackSource {
    pub id: i64,
    pub tech_stack_id: i64,
    pub tech_stack_name: String,
    pub kind: SourceKind,
    pub metadata: SourceMetadata,
}

impl TechStackSource {
    pub fn github_coordinates(&self) -> Option<(&str, &str)> {
        Some((
            self.metadata.get(keys::GITHUB_OWNER)?,
            self.metadata.get(keys::GITHUB_REPO)?,
        ))
    }

    pub fn maven_coordinates(&self) -> Option<(&str, &str)> {
        Some((
            self.metadata.get(keys::MAVEN_GROUP_ID)?,
            self.metadata.get(keys::MAVEN_ARTIFACT_ID)?,
        ))
    }

    pub fn npm_package(&self) -> Option<&str> {
        self.metadata.get(keys::NPM_PACKAGE_NAME)
    }

    pub fn feed_url(&self) -> Option<&str> {
        self.metadata.get(keys::RSS_URL)
    }
}

// ── Releases ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReleaseTagKind {
    Breaking,
    Security,
    Feat,
    Fix,
    Docs,
}

impl ReleaseTagKind {
    pub const ALL: [ReleaseTagKind; 5] = [
        ReleaseTagKind::Breaking,
        ReleaseTagKind::Security,
        ReleaseTagKind::Feat,
        ReleaseTagKind::Fix,
        ReleaseTagKind::Docs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseTagKind::Breaking => "BREAKING",
            ReleaseTagKind::Security => "SECURITY",
            ReleaseTagKind::Feat => "FEAT",
            ReleaseTagKind::Fix => "FIX",
            ReleaseTagKind::Docs => "DOCS",
        }
    }
}

impl fmt::Display for ReleaseTagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseTagKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::UnknownTag(s.to_string()))
    }
}

/// A release about to be recorded by the ingestion engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRelease {
    pub tech_stack_id: i64,
    pub version: String,
    pub title: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub id: i64,
    pub tech_stack_id: i64,
    pub version: String,
    pub title: String,
    pub content: String,
    pub content_translated: Option<String>,
    pub short_summary: Option<String>,
    pub insights: Option<Vec<InsightItem>>,
    pub migration_guide: Option<MigrationGuide>,
    pub technical_keywords: Option<Vec<String>>,
    pub published_at: Option<DateTime<Utc>>,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReleaseRecord {
    pub fn needs_translation(&self) -> bool {
        self.content_translated.is_none()
    }

    pub fn needs_insights(&self) -> bool {
        self.short_summary.is_none()
    }

    pub fn apply_insights(&mut self, payload: &InsightPayload) {
        self.short_summary = Some(payload.short_summary.clone());
        self.insights = Some(payload.insights.clone());
        self.migration_guide = payload.migration_guide.clone();
        self.technical_keywords = Some(payload.technical_keywords.clone());
    }
}

/// Structured output of insight extraction for one release.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightPayload {
    pub short_summary: String,
    #[serde(default)]
    pub insights: Vec<InsightItem>,
    #[serde(default)]
    pub migration_guide: Option<MigrationGuide>,
    #[serde(default)]
    pub technical_keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationGuide {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub code: Option<MigrationCode>,
    #[serde(default)]
    pub checklist: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationCode {
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
}

// ── Backlog ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BacklogStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl BacklogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BacklogStatus::Pending => "PENDING",
            BacklogStatus::Processing => "PROCESSING",
            BacklogStatus::Done => "DONE",
            BacklogStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for BacklogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BacklogStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(BacklogStatus::Pending),
            "PROCESSING" => Ok(BacklogStatus::Processing),
            "DONE" => Ok(BacklogStatus::Done),
            "FAILED" => Ok(BacklogStatus::Failed),
            other => Err(CoreError::UnknownBacklogStatus(other.to_string())),
        }
    }
}

/// Post-processing work unit for exactly one release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklogEntry {
    pub id: i64,
    pub release_id: i64,
    pub status: BacklogStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BacklogEntry {
    pub fn mark_processing(&mut self) {
        self.status = BacklogStatus::Processing;
        self.updated_at = Utc::now();
    }

    /// Return to the queue untouched (quota or interrupt rollback).
    pub fn mark_pending(&mut self) {
        self.status = BacklogStatus::Pending;
        self.updated_at = Utc::now();
    }

    pub fn mark_done(&mut self) {
        self.status = BacklogStatus::Done;
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    /// Count one failed attempt. Reaching `max_retries` is terminal.
    pub fn record_failure(&mut self, error: impl Into<String>, max_retries: u32) {
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.status = if self.retry_count >= max_retries {
            BacklogStatus::Failed
        } else {
            BacklogStatus::Pending
        };
        self.updated_at = Utc::now();
    }
}

/// A claimed backlog entry together with everything needed to process it.
#[derive(Debug, Clone, PartialEq)]
pub struct BacklogItem {
    pub entry: BacklogEntry,
    pub release: ReleaseRecord,
    pub tech_stack_name: String,
    pub tags: Vec<ReleaseTagKind>,
}

// ── AI request log ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AiRequestType {
    Translation,
    Insight,
}

impl AiRequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiRequestType::Translation => "TRANSLATION",
            AiRequestType::Insight => "INSIGHT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AiRequestStatus {
    Requested,
    Success,
    Failed,
}

impl AiRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiRequestStatus::Requested => "REQUESTED",
            AiRequestStatus::Success => "SUCCESS",
            AiRequestStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAiRequest {
    pub provider: String,
    pub model: String,
    pub request_type: AiRequestType,
    pub batch_size: u32,
    pub input_chars: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiRequestOutcome {
    pub status: AiRequestStatus,
    pub output_chars: u64,
    pub duration_ms: u64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiRequestLog {
    pub id: i64,
    pub provider: String,
    pub model: String,
    pub request_type: AiRequestType,
    pub status: AiRequestStatus,
    pub batch_size: u32,
    pub input_chars: u64,
    pub output_chars: u64,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Catalog ───────────────────────────────────────────────────

/// One component/source pair delivered by the catalog service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSource {
    #[serde(default)]
    pub tech_stack_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub color_hex: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: Vec<IncomingMetadata>,
}

//! PostgreSQL implementation of [`ReleaseStore`].
//!
//! Queries are plain SQL strings with positional binds. Every multi-row
//! write (recording a release, claiming a batch, merging source metadata)
//! runs inside its own transaction so a fault leaves only that step undone.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};

use changewire_core::config::PostgresConfig;
use changewire_core::{
    AiRequestOutcome, BacklogEntry, BacklogItem, BacklogStatus, IncomingMetadata, InsightItem,
    InsightPayload, MetadataEntry, MigrationGuide, NewAiRequest, NewRelease, ReleaseRecord,
    ReleaseTagKind, SourceKind, SourceMetadata, TechStack, TechStackSource,
};

use crate::error::StoreError;
use crate::store::{RecordedRelease, ReleaseStore};

const RELEASE_COLUMNS: &str = "id, tech_stack_id, version, title, content, content_translated,
    short_summary, insights, migration_guide, technical_keywords, published_at, source_url, created_at";

const BACKLOG_COLUMNS: &str = "id, release_id, status, retry_count, last_error, created_at, updated_at";

const SOURCE_SELECT: &str = "SELECT s.id, s.tech_stack_id, t.name AS tech_stack_name, s.kind
     FROM tech_stack_source s
     JOIN tech_stack t ON t.id = s.tech_stack_id";

// ── Rows ─────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct TechStackRow {
    id: i64,
    name: String,
    latest_version: Option<String>,
    category: Option<String>,
    color_hex: Option<String>,
}

impl From<TechStackRow> for TechStack {
    fn from(row: TechStackRow) -> Self {
        TechStack {
            id: row.id,
            name: row.name,
            latest_version: row.latest_version,
            category: row.category,
            color_hex: row.color_hex,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: i64,
    tech_stack_id: i64,
    tech_stack_name: String,
    kind: String,
}

#[derive(sqlx::FromRow)]
struct MetadataRow {
    source_id: i64,
    key: String,
    value: String,
}

#[derive(sqlx::FromRow)]
struct ReleaseRow {
    id: i64,
    tech_stack_id: i64,
    version: String,
    title: String,
    content: String,
    content_translated: Option<String>,
    short_summary: Option<String>,
    insights: Option<Json<Vec<InsightItem>>>,
    migration_guide: Option<Json<MigrationGuide>>,
    technical_keywords: Option<Json<Vec<String>>>,
    published_at: Option<DateTime<Utc>>,
    source_url: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ReleaseRow> for ReleaseRecord {
    fn from(row: ReleaseRow) -> Self {
        ReleaseRecord {
            id: row.id,
            tech_stack_id: row.tech_stack_id,
            version: row.version,
            title: row.title,
            content: row.content,
            content_translated: row.content_translated,
            short_summary: row.short_summary,
            insights: row.insights.map(|j| j.0),
            migration_guide: row.migration_guide.map(|j| j.0),
            technical_keywords: row.technical_keywords.map(|j| j.0),
            published_at: row.published_at,
            source_url: row.source_url,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BacklogRow {
    id: i64,
    release_id: i64,
    status: String,
    retry_count: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BacklogRow> for BacklogEntry {
    type Error = StoreError;

    fn try_from(row: BacklogRow) -> Result<Self, Self::Error> {
        Ok(BacklogEntry {
            id: row.id,
            release_id: row.release_id,
            status: row
                .status
                .parse()
                .map_err(|e| StoreError::decode("translation_backlog", e))?,
            retry_count: u32::try_from(row.retry_count).unwrap_or(0),
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn parse_tag(raw: &str) -> Result<ReleaseTagKind, StoreError> {
    raw.parse().map_err(|e| StoreError::decode("release_tag", e))
}

// ── Store ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the configured credentials and apply pending migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        info!("PostgreSQL connected: {}", config.host);

        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!("Database migrations applied successfully");

        Ok(Self { pool })
    }

    async fn attach_metadata(
        conn: &mut PgConnection,
        rows: Vec<SourceRow>,
    ) -> Result<Vec<TechStackSource>, StoreError> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let meta_rows = sqlx::query_as::<_, MetadataRow>(
            "SELECT source_id, key, value
             FROM tech_stack_source_metadata
             WHERE source_id = ANY($1)
             ORDER BY source_id, position",
        )
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut by_source: HashMap<i64, Vec<MetadataEntry>> = HashMap::new();
        for m in meta_rows {
            by_source
                .entry(m.source_id)
                .or_default()
                .push(MetadataEntry::new(m.key, m.value));
        }

        rows.into_iter()
            .map(|row| {
                let kind: SourceKind = row
                    .kind
                    .parse()
                    .map_err(|e| StoreError::decode("tech_stack_source", e))?;
                Ok(TechStackSource {
                    id: row.id,
                    tech_stack_id: row.tech_stack_id,
                    tech_stack_name: row.tech_stack_name,
                    kind,
                    metadata: SourceMetadata::new(by_source.remove(&row.id).unwrap_or_default()),
                })
            })
            .collect()
    }

    async fn load_source(
        conn: &mut PgConnection,
        id: i64,
    ) -> Result<Option<TechStackSource>, StoreError> {
        let row = sqlx::query_as::<_, SourceRow>(&format!("{SOURCE_SELECT} WHERE s.id = $1"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(Self::attach_metadata(conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn insert_backlog(
        conn: &mut PgConnection,
        release_id: i64,
    ) -> Result<Option<BacklogEntry>, StoreError> {
        let row = sqlx::query_as::<_, BacklogRow>(&format!(
            "INSERT INTO translation_backlog (release_id, status)
             VALUES ($1, 'PENDING')
             ON CONFLICT (release_id) DO NOTHING
             RETURNING {BACKLOG_COLUMNS}"
        ))
        .bind(release_id)
        .fetch_optional(&mut *conn)
        .await?;
        row.map(BacklogEntry::try_from).transpose()
    }
}

#[async_trait]
impl ReleaseStore for PgStore {
    async fn list_sources(&self) -> Result<Vec<TechStackSource>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, SourceRow>(&format!("{SOURCE_SELECT} ORDER BY s.id"))
            .fetch_all(&mut *conn)
            .await?;
        Self::attach_metadata(&mut *conn, rows).await
    }

    async fn get_source(&self, id: i64) -> Result<Option<TechStackSource>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::load_source(&mut *conn, id).await
    }

    async fn get_tech_stack(&self, id: i64) -> Result<Option<TechStack>, StoreError> {
        let row = sqlx::query_as::<_, TechStackRow>(
            "SELECT id, name, latest_version, category, color_hex FROM tech_stack WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(TechStack::from))
    }

    async fn upsert_tech_stack(
        &self,
        name: &str,
        category: Option<&str>,
        color_hex: Option<&str>,
    ) -> Result<TechStack, StoreError> {
        let category = category.map(str::trim).filter(|s| !s.is_empty());
        let color_hex = color_hex.map(str::trim).filter(|s| !s.is_empty());
        let row = sqlx::query_as::<_, TechStackRow>(
            "INSERT INTO tech_stack (name, category, color_hex)
             VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE SET
                category   = COALESCE(EXCLUDED.category, tech_stack.category),
                color_hex  = COALESCE(EXCLUDED.color_hex, tech_stack.color_hex),
                updated_at = now()
             RETURNING id, name, latest_version, category, color_hex",
        )
        .bind(name.trim())
        .bind(category)
        .bind(color_hex)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn upsert_source(
        &self,
        tech_stack_id: i64,
        kind: SourceKind,
        metadata: &[IncomingMetadata],
    ) -> Result<TechStackSource, StoreError> {
        let mut tx = self.pool.begin().await?;

        let source_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO tech_stack_source (tech_stack_id, kind)
             VALUES ($1, $2)
             ON CONFLICT (tech_stack_id, kind) DO UPDATE SET updated_at = now()
             RETURNING id",
        )
        .bind(tech_stack_id)
        .bind(kind.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let existing = sqlx::query_as::<_, MetadataRow>(
            "SELECT source_id, key, value
             FROM tech_stack_source_metadata
             WHERE source_id = $1
             ORDER BY position",
        )
        .bind(source_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut merged = SourceMetadata::new(
            existing
                .into_iter()
                .map(|m| MetadataEntry::new(m.key, m.value))
                .collect(),
        );
        merged.merge(metadata);

        sqlx::query("DELETE FROM tech_stack_source_metadata WHERE source_id = $1")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        for (position, entry) in merged.entries().iter().enumerate() {
            sqlx::query(
                "INSERT INTO tech_stack_source_metadata (source_id, position, key, value)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(source_id)
            .bind(position as i32)
            .bind(&entry.key)
            .bind(&entry.value)
            .execute(&mut *tx)
            .await?;
        }

        let source = Self::load_source(&mut *tx, source_id)
            .await?
            .ok_or_else(|| StoreError::not_found("tech_stack_source", source_id))?;

        tx.commit().await?;
        debug!(source_id, kind = %kind, entries = source.metadata.entries().len(), "Source upserted");
        Ok(source)
    }

    async fn update_latest_version(
        &self,
        tech_stack_id: i64,
        version: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE tech_stack SET latest_version = $2, updated_at = now() WHERE id = $1",
        )
        .bind(tech_stack_id)
        .bind(version)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("tech_stack", tech_stack_id));
        }
        Ok(())
    }

    async fn release_exists(&self, tech_stack_id: i64, version: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM release_record WHERE tech_stack_id = $1 AND version = $2)",
        )
        .bind(tech_stack_id)
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn record_release(
        &self,
        release: &NewRelease,
        tags: &[ReleaseTagKind],
    ) -> Result<Option<RecordedRelease>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM release_record WHERE tech_stack_id = $1 AND version = $2)",
        )
        .bind(release.tech_stack_id)
        .bind(&release.version)
        .fetch_one(&mut *tx)
        .await?;
        if exists {
            return Ok(None);
        }

        let inserted = sqlx::query_as::<_, ReleaseRow>(&format!(
            "INSERT INTO release_record (tech_stack_id, version, title, content, published_at, source_url)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {RELEASE_COLUMNS}"
        ))
        .bind(release.tech_stack_id)
        .bind(&release.version)
        .bind(&release.title)
        .bind(&release.content)
        .bind(release.published_at)
        .bind(&release.source_url)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from);

        // A concurrent writer won the race for this (component, version).
        let row = match inserted {
            Ok(row) => row,
            Err(e) if e.is_unique_violation() => return Ok(None),
            Err(e) => return Err(e),
        };

        for tag in tags {
            sqlx::query(
                "INSERT INTO release_tag (release_id, tag) VALUES ($1, $2)
                 ON CONFLICT (release_id, tag) DO NOTHING",
            )
            .bind(row.id)
            .bind(tag.as_str())
            .execute(&mut *tx)
            .await?;
        }

        let backlog = Self::insert_backlog(&mut *tx, row.id).await?;

        tx.commit().await?;
        Ok(Some(RecordedRelease {
            release: row.into(),
            tags: tags.to_vec(),
            backlog,
        }))
    }

    async fn get_release(&self, id: i64) -> Result<Option<ReleaseRecord>, StoreError> {
        let row = sqlx::query_as::<_, ReleaseRow>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM release_record WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ReleaseRecord::from))
    }

    async fn list_releases(&self, tech_stack_id: i64) -> Result<Vec<ReleaseRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ReleaseRow>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM release_record WHERE tech_stack_id = $1 ORDER BY id"
        ))
        .bind(tech_stack_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ReleaseRecord::from).collect())
    }

    async fn release_tags(&self, release_id: i64) -> Result<Vec<ReleaseTagKind>, StoreError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT tag FROM release_tag WHERE release_id = $1 ORDER BY id",
        )
        .bind(release_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|t| parse_tag(t)).collect()
    }

    async fn save_translation(&self, release_id: i64, translated: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE release_record SET content_translated = $2, updated_at = now() WHERE id = $1",
        )
        .bind(release_id)
        .bind(translated)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("release_record", release_id));
        }
        Ok(())
    }

    async fn save_insights(
        &self,
        release_id: i64,
        payload: &InsightPayload,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE release_record SET
                short_summary      = $2,
                insights           = $3,
                migration_guide    = $4,
                technical_keywords = $5,
                updated_at         = now()
             WHERE id = $1",
        )
        .bind(release_id)
        .bind(&payload.short_summary)
        .bind(Json(&payload.insights))
        .bind(payload.migration_guide.as_ref().map(Json))
        .bind(Json(&payload.technical_keywords))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("release_record", release_id));
        }
        Ok(())
    }

    async fn count_backlog(&self, status: BacklogStatus) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM translation_backlog WHERE status = $1",
        )
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn claim_pending(&self, limit: u32) -> Result<Vec<BacklogItem>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, BacklogRow>(&format!(
            "WITH picked AS (
                SELECT id FROM translation_backlog
                WHERE status = 'PENDING'
                ORDER BY created_at, id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
             )
             UPDATE translation_backlog b
             SET status = 'PROCESSING', updated_at = now()
             FROM picked
             WHERE b.id = picked.id
             RETURNING b.{}",
            BACKLOG_COLUMNS.replace(", ", ", b.")
        ))
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await?;

        let mut entries = rows
            .into_iter()
            .map(BacklogEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let release_ids: Vec<i64> = entries.iter().map(|e| e.release_id).collect();

        let releases = sqlx::query_as::<_, ReleaseRow>(&format!(
            "SELECT {RELEASE_COLUMNS} FROM release_record WHERE id = ANY($1)"
        ))
        .bind(&release_ids)
        .fetch_all(&mut *tx)
        .await?;
        let mut releases: HashMap<i64, ReleaseRecord> = releases
            .into_iter()
            .map(|r| (r.id, ReleaseRecord::from(r)))
            .collect();

        let names: HashMap<i64, String> = sqlx::query_as::<_, (i64, String)>(
            "SELECT r.id, t.name
             FROM release_record r
             JOIN tech_stack t ON t.id = r.tech_stack_id
             WHERE r.id = ANY($1)",
        )
        .bind(&release_ids)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();

        let mut tags: HashMap<i64, Vec<ReleaseTagKind>> = HashMap::new();
        for (release_id, tag) in sqlx::query_as::<_, (i64, String)>(
            "SELECT release_id, tag FROM release_tag WHERE release_id = ANY($1) ORDER BY id",
        )
        .bind(&release_ids)
        .fetch_all(&mut *tx)
        .await?
        {
            tags.entry(release_id).or_default().push(parse_tag(&tag)?);
        }

        tx.commit().await?;

        entries
            .into_iter()
            .map(|entry| {
                let release = releases
                    .remove(&entry.release_id)
                    .ok_or_else(|| StoreError::not_found("release_record", entry.release_id))?;
                Ok(BacklogItem {
                    tech_stack_name: names.get(&release.id).cloned().unwrap_or_default(),
                    tags: tags.remove(&release.id).unwrap_or_default(),
                    entry,
                    release,
                })
            })
            .collect()
    }

    async fn save_backlog(&self, entry: &BacklogEntry) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE translation_backlog
             SET status = $2, retry_count = $3, last_error = $4, updated_at = now()
             WHERE id = $1",
        )
        .bind(entry.id)
        .bind(entry.status.as_str())
        .bind(i32::try_from(entry.retry_count).unwrap_or(i32::MAX))
        .bind(&entry.last_error)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("translation_backlog", entry.id));
        }
        Ok(())
    }

    async fn get_backlog(&self, id: i64) -> Result<Option<BacklogEntry>, StoreError> {
        let row = sqlx::query_as::<_, BacklogRow>(&format!(
            "SELECT {BACKLOG_COLUMNS} FROM translation_backlog WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BacklogEntry::try_from).transpose()
    }

    async fn log_ai_request(&self, request: &NewAiRequest) -> Result<i64, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO ai_request_log (provider, model, request_type, status, batch_size, input_chars)
             VALUES ($1, $2, $3, 'REQUESTED', $4, $5)
             RETURNING id",
        )
        .bind(&request.provider)
        .bind(&request.model)
        .bind(request.request_type.as_str())
        .bind(i32::try_from(request.batch_size).unwrap_or(i32::MAX))
        .bind(i64::try_from(request.input_chars).unwrap_or(i64::MAX))
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn complete_ai_request(
        &self,
        id: i64,
        outcome: &AiRequestOutcome,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE ai_request_log
             SET status = $2, output_chars = $3, duration_ms = $4, error_message = $5, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(outcome.status.as_str())
        .bind(i64::try_from(outcome.output_chars).unwrap_or(i64::MAX))
        .bind(i64::try_from(outcome.duration_ms).unwrap_or(i64::MAX))
        .bind(&outcome.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

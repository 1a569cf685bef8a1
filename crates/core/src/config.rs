use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub github: GithubConfig,
    pub registry: RegistryConfig,
    pub catalog: CatalogConfig,
    pub llm: LlmConfig,
    pub gate: RateGateConfig,
    pub backlog: BacklogConfig,
    pub schedule: ScheduleConfig,
    pub bus: BusConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CHANGEWIRE_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CHANGEWIRE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p),
            github: GithubConfig::from_env_profiled(p),
            registry: RegistryConfig::from_env_profiled(p),
            catalog: CatalogConfig::from_env_profiled(p),
            llm: LlmConfig::from_env_profiled(p),
            gate: RateGateConfig::from_env_profiled(p),
            backlog: BacklogConfig::from_env_profiled(p),
            schedule: ScheduleConfig::from_env_profiled(p),
            bus: BusConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  postgres:    host={}, db={}, configured={}", self.postgres.host, self.postgres.database, self.postgres.is_configured());
        tracing::info!("  github:      api={}, token={}, tag_limit={}", self.github.api_url, self.github.token.is_some(), self.github.tag_limit);
        tracing::info!("  registry:    maven={}, npm={}", self.registry.maven_url, self.registry.npm_url);
        tracing::info!("  catalog:     url={}", self.catalog.url.as_deref().unwrap_or("(none)"));
        tracing::info!("  llm:         provider={}, configured={}, language={}", self.llm.provider, self.llm.is_configured(), self.llm.translation_language);
        tracing::info!("  gate:        min_interval_ms={}, max_per_day={}", self.gate.min_interval_ms, self.gate.max_requests_per_day);
        tracing::info!("  backlog:     batch={}, min_pending={}, min_interval_min={}, max_retries={}", self.backlog.batch_size, self.backlog.min_pending, self.backlog.min_interval_minutes, self.backlog.max_retries);
        tracing::info!("  schedule:    crawl='{}', backlog='{}'", self.schedule.crawl_cron, self.schedule.backlog_cron);
        tracing::info!("  bus:         endpoint={}, topic={}", self.bus.endpoint, self.bus.topic);
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "changewire"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── GitHub ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    pub api_url: String,
    pub token: Option<String>,
    /// Tags requested per listing (clamped to 1..=100 by the adapter).
    pub tag_limit: u32,
}

impl GithubConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            api_url: profiled_env_or(p, "GITHUB_API_URL", "https://api.github.com"),
            token: profiled_env_opt(p, "GITHUB_TOKEN"),
            tag_limit: profiled_env_u32(p, "GITHUB_TAG_LIMIT", 30),
        }
    }
}

// ── Package registries / feeds ────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub maven_url: String,
    pub npm_url: String,
    pub feed_entry_limit: u32,
    pub http_timeout_secs: u64,
}

impl RegistryConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            maven_url: profiled_env_or(p, "MAVEN_REPO_URL", "https://repo1.maven.org/maven2"),
            npm_url: profiled_env_or(p, "NPM_REGISTRY_URL", "https://registry.npmjs.org"),
            feed_entry_limit: profiled_env_u32(p, "FEED_ENTRY_LIMIT", 30),
            http_timeout_secs: profiled_env_u64(p, "HTTP_TIMEOUT_SECS", 10),
        }
    }
}

// ── Catalog service ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Base URL of the catalog service. Sync is disabled when unset.
    pub url: Option<String>,
}

impl CatalogConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_opt(p, "CATALOG_URL"),
        }
    }
}

// ── LLM (Gemini / OpenAI / Ollama) ────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "gemini", "openai", "ollama"
    pub provider: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub ollama_url: String,
    pub ollama_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub translation_language: String,
}

impl LlmConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: profiled_env_or(p, "LLM_PROVIDER", "gemini"),
            gemini_api_key: profiled_env_opt(p, "GEMINI_API_KEY"),
            gemini_model: profiled_env_or(p, "GEMINI_MODEL", "gemini-1.5-flash"),
            openai_api_key: profiled_env_opt(p, "OPENAI_API_KEY"),
            openai_model: profiled_env_or(p, "OPENAI_MODEL", "gpt-4o-mini"),
            openai_base_url: profiled_env_opt(p, "OPENAI_BASE_URL"),
            ollama_url: profiled_env_or(p, "OLLAMA_URL", "http://localhost:11434"),
            ollama_model: profiled_env_or(p, "OLLAMA_MODEL", "llama3.2"),
            temperature: profiled_env_or(p, "LLM_TEMPERATURE", "0.1")
                .parse()
                .unwrap_or(0.1),
            max_tokens: profiled_env_u32(p, "LLM_MAX_TOKENS", 8192),
            translation_language: profiled_env_or(p, "TRANSLATION_LANGUAGE", "Korean"),
        }
    }

    pub fn is_configured(&self) -> bool {
        match self.provider.as_str() {
            "gemini" => self.gemini_api_key.is_some(),
            "openai" => self.openai_api_key.is_some(),
            "ollama" => true,
            _ => false,
        }
    }
}

// ── AI rate gate ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateGateConfig {
    pub min_interval_ms: u64,
    pub max_requests_per_day: u32,
}

impl RateGateConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            min_interval_ms: profiled_env_u64(p, "AI_MIN_INTERVAL_MS", 6000),
            max_requests_per_day: profiled_env_u32(p, "AI_MAX_REQUESTS_PER_DAY", 20),
        }
    }
}

// ── Backlog processing ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacklogConfig {
    pub batch_size: u32,
    pub min_pending: u32,
    pub min_interval_minutes: u64,
    pub max_retries: u32,
}

impl BacklogConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            batch_size: profiled_env_u32(p, "BACKLOG_BATCH_SIZE", 50).max(1),
            min_pending: profiled_env_u32(p, "BACKLOG_MIN_PENDING", 50),
            min_interval_minutes: profiled_env_u64(p, "BACKLOG_MIN_INTERVAL_MINUTES", 60),
            max_retries: profiled_env_u32(p, "BACKLOG_MAX_RETRIES", 3).max(1),
        }
    }
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            min_pending: 50,
            min_interval_minutes: 60,
            max_retries: 3,
        }
    }
}

// ── Scheduler cadence ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub crawl_cron: String,
    pub backlog_cron: String,
}

impl ScheduleConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            crawl_cron: profiled_env_or(p, "CRAWL_CRON", "0 */10 * * * *"),
            backlog_cron: profiled_env_or(p, "BACKLOG_CRON", "0 */5 * * * *"),
        }
    }
}

// ── Event bus ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub endpoint: String,
    pub topic: String,
    /// Bind the PUB socket instead of connecting to a broker frontend.
    pub bind: bool,
}

impl BusConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            endpoint: profiled_env_or(p, "BUS_ENDPOINT", "tcp://127.0.0.1:5555"),
            topic: profiled_env_or(p, "BUS_TOPIC", "changewire.release.published"),
            bind: profiled_env_or(p, "BUS_BIND", "false").eq_ignore_ascii_case("true"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_defaults_user() {
        let pg = PostgresConfig {
            host: "db".into(),
            port: 5433,
            database: "changewire".into(),
            username: None,
            password: None,
            ssl_mode: "disable".into(),
            max_connections: 4,
        };
        assert_eq!(
            pg.connection_string(),
            "postgres://postgres:@db:5433/changewire?sslmode=disable"
        );
        assert!(!pg.is_configured());
    }

    #[test]
    fn test_llm_is_configured_per_provider() {
        let mut llm = LlmConfig::from_env_profiled("CHANGEWIRE_TEST_UNUSED");
        llm.provider = "gemini".into();
        llm.gemini_api_key = None;
        assert!(!llm.is_configured());
        llm.gemini_api_key = Some("k".into());
        assert!(llm.is_configured());
        llm.provider = "ollama".into();
        assert!(llm.is_configured());
        llm.provider = "nope".into();
        assert!(!llm.is_configured());
    }
}

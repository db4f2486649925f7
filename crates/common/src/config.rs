use anyhow::{Context, Result};
use serde::Deserialize;
use validator::Validate;

// Default constants
pub const DEFAULT_DB_PATH: &str = "tmp/granary.duckdb";
pub const DEFAULT_RAW_TABLE: &str = "events";
pub const DEFAULT_PERSISTED_TABLE: &str = "events_persisted";

pub const DEFAULT_CACHE_ENABLED: bool = true;
pub const DEFAULT_CACHE_MAX_SIZE_MB: u64 = 100;
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 1800;
pub const DEFAULT_CACHE_INITIAL_ENTRIES: u64 = 1000;

pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

pub const DEFAULT_TELEMETRY_ENABLED: bool = false;
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";
pub const DEFAULT_SERVICE_NAME: &str = "granary";

/// Top-level application configuration.
///
/// Loaded from an optional file plus `GRANARY`-prefixed environment
/// variables (`GRANARY_ENGINE__DB_PATH` maps to `engine.db_path`, etc).
#[derive(Debug, Deserialize, Default, Clone, Validate)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub limits: QueryLimits,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineSettings {
    /// Path to the DuckDB database file holding the dataset and rollups.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Name of the raw event view queried when no rollup applies.
    #[serde(default = "default_raw_table")]
    pub raw_table: String,

    /// Name of the persisted (fully typed) event table rollups are built from.
    #[serde(default = "default_persisted_table")]
    pub persisted_table: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            raw_table: default_raw_table(),
            persisted_table: default_persisted_table(),
        }
    }
}

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_string()
}

fn default_raw_table() -> String {
    DEFAULT_RAW_TABLE.to_string()
}

fn default_persisted_table() -> String {
    DEFAULT_PERSISTED_TABLE.to_string()
}

/// Result cache sizing and expiry.
#[derive(Debug, Deserialize, Clone, Validate)]
pub struct CacheSettings {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    #[serde(default = "default_cache_max_size_mb")]
    #[validate(range(min = 1))]
    pub max_size_mb: u64,

    #[serde(default = "default_cache_ttl_seconds")]
    #[validate(range(min = 1))]
    pub ttl_seconds: u64,

    /// Pre-sized entry slots for the cache map. The binding bound is
    /// `max_size_mb`; this only avoids rehashing while the cache warms up.
    #[serde(default = "default_cache_initial_entries")]
    #[validate(range(min = 1))]
    pub initial_entries: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_size_mb: default_cache_max_size_mb(),
            ttl_seconds: default_cache_ttl_seconds(),
            initial_entries: default_cache_initial_entries(),
        }
    }
}

fn default_cache_enabled() -> bool {
    DEFAULT_CACHE_ENABLED
}

fn default_cache_max_size_mb() -> u64 {
    DEFAULT_CACHE_MAX_SIZE_MB
}

fn default_cache_ttl_seconds() -> u64 {
    DEFAULT_CACHE_TTL_SECONDS
}

fn default_cache_initial_entries() -> u64 {
    DEFAULT_CACHE_INITIAL_ENTRIES
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct QueryLimits {
    /// Wall-clock budget per engine call. On expiry the query fails with
    /// a timeout and is not cached; the in-flight engine work is abandoned.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_query_timeout_secs() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

/// Backoff settings for the caller-side retry of transient failures.
/// The core never retries on its own.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct TelemetrySettings {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_otlp_endpoint")]
    #[validate(url)]
    pub endpoint: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            endpoint: default_otlp_endpoint(),
            service_name: default_service_name(),
        }
    }
}

fn default_telemetry_enabled() -> bool {
    DEFAULT_TELEMETRY_ENABLED
}

fn default_otlp_endpoint() -> String {
    DEFAULT_OTLP_ENDPOINT.to_string()
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = config::Config::builder();

        let builder = if std::path::Path::new(path).exists() {
            builder.add_source(config::File::with_name(path))
        } else {
            builder
        };

        // Map GRANARY_CACHE__TTL_SECONDS to cache.ttl_seconds, etc.
        let builder = builder.add_source(
            config::Environment::with_prefix("GRANARY")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().context("Failed to build configuration")?;

        let app_config: AppConfig = cfg
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {:?}", e))?;

        Ok(app_config)
    }
}

//! Configuration loader for the `sensorflow-cache` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). The monitored sensor list is part of this
//! configuration, so changing it is a restart rather than a redeploy.
use std::{env, fs, time::Duration};

use anyhow::{anyhow, bail, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional 64-bit integer environment variable with a default value.
macro_rules! parse_env_u64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Where the startup-once summary guard lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitScope {
    /// One run per deployment, guarded by a shared cache key.
    Deployment,
    /// One run per process.
    Process,
}

impl InitScope {
    fn parse(value: &str) -> Result<Self> {
        // ---
        match value.trim().to_ascii_lowercase().as_str() {
            "deployment" => Ok(InitScope::Deployment),
            "process" => Ok(InitScope::Process),
            other => bail!("Invalid SUMMARY_INIT_SCOPE: {other} (expected deployment|process)"),
        }
    }
}

/// Settings for the optional text-generation collaborator.
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    // ---
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub window: u32,
    pub init_scope: InitScope,
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Redis connection string. `None` selects the in-process cache.
    pub redis_url: Option<String>,

    /// Sensor vendor API base URL.
    pub api_url: String,

    /// Monitored sensor IDs, in configuration order.
    pub sensor_ids: Vec<String>,

    pub fetch_timeout: Duration,
    pub cache_ttl: Duration,
    pub summary_ttl: Duration,

    /// Minutes between fan-out refreshes.
    pub refresh_every_minutes: u32,

    /// Upper bound on fetches in flight at once.
    pub refresh_concurrency: u32,

    /// Minutes between synthetic readings; 0 disables the generator.
    pub synthetic_every_minutes: u32,

    /// Present only when a summary API key is configured.
    pub summary: Option<SummaryConfig>,

    pub port: u16,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
/// - `SENSOR_API_URL` – Sensor vendor API base URL
/// - `SENSOR_IDS` or `SENSOR_LIST_FILE` – monitored sensors
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `REDIS_URL` – cache backend (default: in-process)
/// - `FETCH_TIMEOUT_SECS` (10), `CACHE_TTL_SECS` (1500), `SUMMARY_TTL_SECS` (172800)
/// - `REFRESH_EVERY_MINUTES` (1), `REFRESH_CONCURRENCY` (8)
/// - `SYNTHETIC_EVERY_MINUTES` (0, disabled)
/// - `SUMMARY_API_KEY`, `SUMMARY_API_URL`, `SUMMARY_MODEL`, `SUMMARY_WINDOW`,
///   `SUMMARY_INIT_SCOPE`
/// - `PORT` (8080)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let api_url = require_env!("SENSOR_API_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let redis_url = env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty());

    let sensor_ids = match (env::var("SENSOR_IDS"), env::var("SENSOR_LIST_FILE")) {
        (Ok(list), _) => parse_sensor_list(&list)?,
        (Err(_), Ok(path)) => {
            let raw = fs::read_to_string(&path)
                .map_err(|e| anyhow!("Failed to read SENSOR_LIST_FILE '{}': {}", path, e))?;
            parse_sensor_list(&raw)?
        }
        _ => bail!("SENSOR_IDS or SENSOR_LIST_FILE must be set in .env or environment"),
    };
    if sensor_ids.is_empty() {
        bail!("Sensor list is empty");
    }

    let fetch_timeout = Duration::from_secs(parse_env_u64!("FETCH_TIMEOUT_SECS", 10));
    let cache_ttl = Duration::from_secs(parse_env_u64!("CACHE_TTL_SECS", 1500));
    let summary_ttl = Duration::from_secs(parse_env_u64!("SUMMARY_TTL_SECS", 172_800));

    let refresh_every_minutes = parse_env_u32!("REFRESH_EVERY_MINUTES", 1);
    if refresh_every_minutes == 0 {
        bail!("REFRESH_EVERY_MINUTES must be at least 1");
    }
    let refresh_concurrency = parse_env_u32!("REFRESH_CONCURRENCY", 8).max(1);
    let synthetic_every_minutes = parse_env_u32!("SYNTHETIC_EVERY_MINUTES", 0);

    let summary = match env::var("SUMMARY_API_KEY").ok().filter(|k| !k.is_empty()) {
        Some(api_key) => Some(SummaryConfig {
            api_url: env::var("SUMMARY_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key,
            model: env::var("SUMMARY_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            window: parse_env_u32!("SUMMARY_WINDOW", 48),
            init_scope: InitScope::parse(
                &env::var("SUMMARY_INIT_SCOPE").unwrap_or_else(|_| "deployment".to_string()),
            )?,
        }),
        None => None,
    };

    let port = env::var("PORT")
        .ok()
        .map(|v| v.parse::<u16>())
        .transpose()
        .map_err(|e| anyhow!("Invalid PORT: {}", e))?
        .unwrap_or(8080);

    Ok(Config {
        db_url,
        db_pool_max,
        redis_url,
        api_url,
        sensor_ids,
        fetch_timeout,
        cache_ttl,
        summary_ttl,
        refresh_every_minutes,
        refresh_concurrency,
        synthetic_every_minutes,
        summary,
        port,
    })
}

/// Parse a sensor list given either as a JSON array of strings or as
/// comma/newline separated IDs. Blank entries and `#` comment lines are ignored.
pub fn parse_sensor_list(raw: &str) -> Result<Vec<String>> {
    // ---
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        let ids: Vec<String> = serde_json::from_str(trimmed)
            .map_err(|e| anyhow!("Invalid sensor list JSON: {}", e))?;
        return Ok(ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect());
    }

    Ok(trimmed
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect())
}

/// Mask the password component of a connection URL.
fn mask_url(url: &str) -> String {
    // ---
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // Skip the scheme separator in URLs without a password.
            if url[colon_pos..].starts_with("://") {
                return url.to_string();
            }
            return format!("{}:****{}", &url[..colon_pos], &url[at_pos..]);
        }
    }
    url.to_string()
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL          : {}", mask_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX           : {}", self.db_pool_max);
        tracing::info!(
            "  REDIS_URL             : {}",
            self.redis_url.as_deref().map(mask_url).unwrap_or_else(|| "(in-process cache)".into())
        );
        tracing::info!("  SENSOR_API_URL        : {}", self.api_url);
        tracing::info!("  SENSORS               : {}", self.sensor_ids.len());
        tracing::info!("  FETCH_TIMEOUT_SECS    : {}", self.fetch_timeout.as_secs());
        tracing::info!("  CACHE_TTL_SECS        : {}", self.cache_ttl.as_secs());
        tracing::info!("  SUMMARY_TTL_SECS      : {}", self.summary_ttl.as_secs());
        tracing::info!("  REFRESH_EVERY_MINUTES : {}", self.refresh_every_minutes);
        tracing::info!("  REFRESH_CONCURRENCY   : {}", self.refresh_concurrency);
        tracing::info!("  SYNTHETIC_EVERY_MINUTES: {}", self.synthetic_every_minutes);
        match &self.summary {
            Some(s) => tracing::info!(
                "  SUMMARIES             : {} via {} ({:?} scope)",
                s.model,
                s.api_url,
                s.init_scope
            ),
            None => tracing::info!("  SUMMARIES             : disabled"),
        }
        tracing::info!("  PORT                  : {}", self.port);
    }
}

//! Configuration layer: typed settings with layered precedence (file → env).
//!
//! Backend credentials come from the process environment only
//! (`EKKLESIA_KV_REST_URL`, `EKKLESIA_KV_REST_TOKEN`); everything else can
//! also be set in `ekklesia.toml`. Missing credentials are not an error:
//! they put the cache layer into its degraded pass-through mode.

use std::fmt;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const LOCAL_CONFIG_BASENAME: &str = "ekklesia";
const ENV_PREFIX: &str = "EKKLESIA";

pub const ENV_KV_REST_URL: &str = "EKKLESIA_KV_REST_URL";
pub const ENV_KV_REST_TOKEN: &str = "EKKLESIA_KV_REST_TOKEN";
pub const ENV_CACHE_OFFLINE: &str = "EKKLESIA_CACHE_OFFLINE";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SESSION_TTL_SECS: u64 = 86_400;
const DEFAULT_LOCK_RETRY_DELAY_MS: u64 = 150;
const DEFAULT_SCAN_COUNT: u64 = 100;
const DEFAULT_LIST_PAGE_BOUND: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Top-level settings for the cache layer and its operational tooling.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings with layered precedence: `ekklesia.toml` (optional),
    /// then `EKKLESIA__`-prefixed environment variables, then the dedicated
    /// credential variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(LOCAL_CONFIG_BASENAME)
    }

    pub fn load_from(config_basename: &str) -> Result<Self, ConfigError> {
        let mut settings: Settings = Config::builder()
            .add_source(File::with_name(config_basename).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        settings.cache.apply_env_credentials();
        Ok(settings)
    }
}

/// Settings for the remote key-value backend and cache behavior.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// HTTPS endpoint of the key-value store's REST interface.
    pub rest_url: Option<String>,
    /// Bearer token for the REST interface.
    pub rest_token: Option<String>,
    /// Treat the backend as absent, e.g. during offline/static builds.
    pub offline: bool,
    /// Per-request timeout for backend calls.
    pub request_timeout_ms: u64,
    /// TTL applied when a session read extends the session's life.
    pub session_ttl_secs: u64,
    /// How long a caller that lost the fetch lock waits before re-checking.
    pub lock_retry_delay_ms: u64,
    /// Keys per SCAN iteration during pattern deletion.
    pub scan_count: u64,
    /// How many paginated list pages are invalidated per list.
    /// Deeper pages are left to expire via their own TTL.
    pub list_page_bound: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            rest_url: None,
            rest_token: None,
            offline: false,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            lock_retry_delay_ms: DEFAULT_LOCK_RETRY_DELAY_MS,
            scan_count: DEFAULT_SCAN_COUNT,
            list_page_bound: DEFAULT_LIST_PAGE_BOUND,
        }
    }
}

impl CacheSettings {
    /// Read credentials and the offline flag from the process environment.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env_credentials();
        settings
    }

    fn apply_env_credentials(&mut self) {
        if let Ok(url) = std::env::var(ENV_KV_REST_URL)
            && !url.is_empty()
        {
            self.rest_url = Some(url);
        }
        if let Ok(token) = std::env::var(ENV_KV_REST_TOKEN)
            && !token.is_empty()
        {
            self.rest_token = Some(token);
        }
        if let Ok(flag) = std::env::var(ENV_CACHE_OFFLINE) {
            self.offline = matches!(flag.as_str(), "1" | "true" | "yes");
        }
    }

    /// True when both credentials are present and the offline flag is unset.
    pub fn credentials_present(&self) -> bool {
        !self.offline && self.rest_url.is_some() && self.rest_token.is_some()
    }
}

// Manual Debug so the bearer token never reaches logs.
impl fmt::Debug for CacheSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSettings")
            .field("rest_url", &self.rest_url)
            .field("rest_token", &self.rest_token.as_ref().map(|_| "<redacted>"))
            .field("offline", &self.offline)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("lock_retry_delay_ms", &self.lock_retry_delay_ms)
            .field("scan_count", &self.scan_count)
            .field("list_page_bound", &self.list_page_bound)
            .finish()
    }
}

/// Base log level for the operational binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
        }
    }
}

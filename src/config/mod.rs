// Application configuration.
// Loaded from an optional TOML file; every section falls back to defaults.

pub mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, StarboardError};
use crate::retry::RetryPolicy;

pub use logging::LoggingConfig;

/// Environment variable holding the metadata service token (optional).
pub const METADATA_TOKEN_ENV: &str = "STARBOARD_METADATA_TOKEN";

/// Environment variable holding the remote dispatcher bearer token.
pub const DISPATCH_TOKEN_ENV: &str = "STARBOARD_DISPATCH_TOKEN";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sources: SourcesConfig,
    pub cache: CacheConfig,
    pub dispatch: DispatchConfig,
    pub refresh: RefreshConfig,
    pub retry: RetryPolicy,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| StarboardError::Config(e.to_string()))
    }
}

/// Inbound HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
        }
    }
}

/// Upstream data sources.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Base URL of the daily-activity documents (`{base}/{YYYY-MM-DD}.json`).
    pub activity_base_url: String,
    /// Base URL of the repository metadata service (`{base}/{owner}/{repo}`).
    pub metadata_base_url: String,
    pub timeout_secs: u64,
    /// In-flight limit for direct metadata fetches.
    pub metadata_concurrency: usize,
    /// In-flight limit for per-day fetches inside one window.
    pub day_concurrency: usize,
}

impl SourcesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Token for the metadata service, if one is configured.
    pub fn metadata_token(&self) -> Option<String> {
        std::env::var(METADATA_TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            activity_base_url: "https://stars.example.org/daily".into(),
            metadata_base_url: "https://meta.example.org/repos".into(),
            timeout_secs: 20,
            metadata_concurrency: 16,
            day_concurrency: 8,
        }
    }
}

/// Which cache backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    File,
    Memory,
}

/// Cache tiers and TTLs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Overrides the platform cache directory for the file backend.
    pub dir: Option<PathBuf>,
    /// Version segment of every key; bump it to bust the whole cache.
    pub schema_version: String,
    /// TTL for days that are over (UTC).
    pub closed_day_ttl_secs: u64,
    /// TTL for today's day and for windows with missing days.
    pub open_day_ttl_secs: u64,
    pub window_ttl_secs: u64,
    pub enrichment_ttl_secs: u64,
    /// Backstop TTL for the rolling day/week/month lists.
    pub latest_ttl_secs: u64,
}

impl CacheConfig {
    pub fn closed_day_ttl(&self) -> Duration {
        Duration::from_secs(self.closed_day_ttl_secs)
    }

    pub fn open_day_ttl(&self) -> Duration {
        Duration::from_secs(self.open_day_ttl_secs)
    }

    pub fn window_ttl(&self) -> Duration {
        Duration::from_secs(self.window_ttl_secs)
    }

    pub fn enrichment_ttl(&self) -> Duration {
        Duration::from_secs(self.enrichment_ttl_secs)
    }

    pub fn latest_ttl(&self) -> Duration {
        Duration::from_secs(self.latest_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::File,
            dir: None,
            schema_version: "v3".into(),
            closed_day_ttl_secs: 7 * 24 * 60 * 60,
            open_day_ttl_secs: 15 * 60,
            window_ttl_secs: 6 * 60 * 60,
            enrichment_ttl_secs: 24 * 60 * 60,
            latest_ttl_secs: 36 * 60 * 60,
        }
    }
}

/// How metadata fetches are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One GET per repository from this process.
    Direct,
    /// In-process worker pool with rate limiting.
    #[default]
    Local,
    /// Remote fan-out service reached over a streaming POST.
    Remote,
}

/// Fan-out dispatcher settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mode: DispatchMode,
    /// Remote dispatcher URL, required for `remote` mode.
    pub endpoint: Option<String>,
    /// Workers (requests in flight).
    pub concurrency: usize,
    /// Requests admitted per second across all workers.
    pub rate_per_second: u32,
    pub queue_capacity: usize,
    pub max_batch_items: usize,
    pub max_item_bytes: usize,
    pub max_result_bytes: usize,
}

impl DispatchConfig {
    /// Bearer token shared by the remote dispatcher client and the dispatch route.
    pub fn token(&self) -> Result<String> {
        std::env::var(DISPATCH_TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or(StarboardError::MissingToken(DISPATCH_TOKEN_ENV))
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Local,
            endpoint: None,
            concurrency: 6,
            rate_per_second: 10,
            queue_capacity: 64,
            max_batch_items: 500,
            max_item_bytes: 64 * 1024,
            max_result_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Daily refresh rule for the rolling lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Hour (UTC) at which the upstream source starts its daily update.
    pub hour_utc: u32,
    /// Minutes to wait after `hour_utc` before the new day is safe to fetch.
    pub buffer_minutes: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            hour_utc: 1,
            buffer_minutes: 30,
        }
    }
}

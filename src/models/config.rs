//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Environment variable overriding `index.url`.
pub const INDEX_URL_ENV: &str = "HARVESTER_INDEX_URL";

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Index store connection and index names
    #[serde(default)]
    pub index: IndexConfig,

    /// HTTP, paging and retry behavior for extractors
    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Media fetch limits for enrichment stages
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Worker pool settings
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            let mut config = Self::default();
            config.apply_env();
            config
        })
    }

    /// Apply environment overrides.
    pub fn with_env(mut self) -> Self {
        self.apply_env();
        self
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(INDEX_URL_ENV) {
            if !url.trim().is_empty() {
                self.index.url = url;
            }
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.index.url)
            .map_err(|e| AppError::validation(format!("index.url is invalid: {e}")))?;
        url::Url::parse(&self.index.resolver_base_url).map_err(|e| {
            AppError::validation(format!("index.resolver_base_url is invalid: {e}"))
        })?;
        if self.index.combined_index.trim().is_empty() {
            return Err(AppError::validation("index.combined_index is empty"));
        }
        if self.index.resolver_index.trim().is_empty() {
            return Err(AppError::validation("index.resolver_index is empty"));
        }
        if self.extractor.user_agent.trim().is_empty() {
            return Err(AppError::validation("extractor.user_agent is empty"));
        }
        if self.extractor.timeout_secs == 0 {
            return Err(AppError::validation("extractor.timeout_secs must be > 0"));
        }
        if self.enrichment.max_media_bytes == 0 {
            return Err(AppError::validation(
                "enrichment.max_media_bytes must be > 0",
            ));
        }
        if self.runtime.workers == 0 {
            return Err(AppError::validation("runtime.workers must be > 0"));
        }
        if self.runtime.queue_capacity == 0 {
            return Err(AppError::validation("runtime.queue_capacity must be > 0"));
        }
        Ok(())
    }
}

/// Index store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Base URL of the Elasticsearch-compatible store
    #[serde(default = "defaults::index_url")]
    pub url: String,

    /// Alias of the cross-source combined index
    #[serde(default = "defaults::combined_index")]
    pub combined_index: String,

    /// Index holding media resolver entries
    #[serde(default = "defaults::resolver_index")]
    pub resolver_index: String,

    /// Public base URL under which hashed media aliases resolve
    #[serde(default = "defaults::resolver_base_url")]
    pub resolver_base_url: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: defaults::index_url(),
            combined_index: defaults::combined_index(),
            resolver_index: defaults::resolver_index(),
            resolver_base_url: defaults::resolver_base_url(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Extractor HTTP and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Retries of one page after transient failures
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Retry n waits n times this many milliseconds
    #[serde(default = "defaults::backoff_unit")]
    pub backoff_unit_ms: u64,

    /// Delay between page requests in milliseconds
    #[serde(default)]
    pub request_delay_ms: u64,
}

impl ExtractorConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_retries: defaults::max_retries(),
            backoff_unit_ms: defaults::backoff_unit(),
            request_delay_ms: 0,
        }
    }
}

/// Media fetch limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Hard cap on bytes read per media asset
    #[serde(default = "defaults::max_media_bytes")]
    pub max_media_bytes: u64,

    /// Bytes kept in memory before spooling to disk
    #[serde(default = "defaults::spool_threshold")]
    pub spool_threshold_bytes: usize,

    /// Media request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_media_bytes: defaults::max_media_bytes(),
            spool_threshold_bytes: defaults::spool_threshold(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Task runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of concurrent chain workers
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// Pending chains buffered before `submit` waits
    #[serde(default = "defaults::queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: defaults::workers(),
            queue_capacity: defaults::queue_capacity(),
        }
    }
}

mod defaults {
    pub fn index_url() -> String {
        "http://localhost:9200".into()
    }
    pub fn combined_index() -> String {
        "combined_index".into()
    }
    pub fn resolver_index() -> String {
        "resolver".into()
    }
    pub fn resolver_base_url() -> String {
        "http://localhost:5000/v0/resolve".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; harvester/0.1)".into()
    }
    pub fn max_retries() -> u32 {
        10
    }
    pub fn backoff_unit() -> u64 {
        1000
    }
    pub fn max_media_bytes() -> u64 {
        50 * 1024 * 1024
    }
    pub fn spool_threshold() -> usize {
        4 * 1024 * 1024
    }
    pub fn workers() -> usize {
        4
    }
    pub fn queue_capacity() -> usize {
        64
    }
}

//! Application configuration with layered loading.
//!
//! Sources, highest precedence first:
//!
//! 1. Environment variables (SCRAPE_*)
//! 2. TOML config file (if SCRAPE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

use crate::Error;
use crate::database::SqliteConfig;
use crate::database::sqlite::DEFAULT_DB_PATH;
use crate::fetcher::{BatchOptions, DEFAULT_BATCH_CONCURRENCY};
use crate::resource::DEFAULT_TTL;

/// Environment variable prefix for every setting.
pub const ENV_PREFIX: &str = "SCRAPE_";

/// Names a TOML file merged between defaults and the environment.
pub const CONFIG_FILE_ENV: &str = "SCRAPE_CONFIG_FILE";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:88.0) Gecko/20100101 Firefox/88.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database, or `:memory:`.
    ///
    /// Set via SCRAPE_DB_PATH.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Seconds a saved page stays fresh.
    ///
    /// Set via SCRAPE_DEFAULT_TTL_SECS.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Bound for bulk statements such as clearing the store.
    ///
    /// Set via SCRAPE_QUERY_TIMEOUT_MS.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// How long SQLite waits on a locked database.
    ///
    /// Set via SCRAPE_BUSY_TIMEOUT_MS.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Set via SCRAPE_USER_AGENT.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum response body size in bytes.
    ///
    /// Set via SCRAPE_MAX_BYTES.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via SCRAPE_TIMEOUT_MS.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Set via SCRAPE_MAX_REDIRECTS.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Concurrent extraction fetches per batch.
    ///
    /// Set via SCRAPE_BATCH_CONCURRENCY.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Allow fetches through a headless browser when the render feature is
    /// compiled in.
    ///
    /// Set via SCRAPE_RENDER_ENABLED.
    #[serde(default)]
    pub render_enabled: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL.as_secs()
}

fn default_query_timeout_ms() -> u64 {
    30_000
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_redirects() -> usize {
    5
}

fn default_batch_concurrency() -> usize {
    DEFAULT_BATCH_CONCURRENCY
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            default_ttl_secs: default_ttl_secs(),
            query_timeout_ms: default_query_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            max_redirects: default_max_redirects(),
            batch_concurrency: default_batch_concurrency(),
            render_enabled: false,
        }
    }
}

impl AppConfig {
    /// HTTP timeout as Duration for use with reqwest.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions { max_concurrency: self.batch_concurrency }
    }

    /// SQLite options for `db_path`, creating its parent directories.
    pub fn sqlite(&self) -> Result<SqliteConfig, Error> {
        Ok(SqliteConfig::file(&self.db_path)?
            .with_query_timeout(self.query_timeout())
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms)))
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed, or
    /// if validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var(CONFIG_FILE_ENV) {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).map(|key| key.as_str().to_lowercase().into()).split("__"));

        Self::from_figment(&figment)
    }

    /// Extract and validate from an already layered figment.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

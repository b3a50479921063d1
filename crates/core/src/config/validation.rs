//! Configuration validation rules.
//!
//! Applied to `AppConfig` after it has been loaded from environment, files
//! or defaults.

use crate::config::AppConfig;
use crate::fetcher::MAX_BATCH_CONCURRENCY;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` for an empty `db_path` and
    /// `ConfigError::Invalid` for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing {
                field: "db_path".into(),
                hint: "Set SCRAPE_DB_PATH to a file path or :memory:".into(),
            });
        }

        if self.default_ttl_secs == 0 {
            return Err(invalid("default_ttl_secs", "must be greater than 0"));
        }

        if self.query_timeout_ms < 100 {
            return Err(invalid("query_timeout_ms", "must be at least 100ms"));
        }

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.max_redirects > 20 {
            return Err(invalid("max_redirects", "must not exceed 20"));
        }

        if self.batch_concurrency == 0 || self.batch_concurrency > MAX_BATCH_CONCURRENCY {
            return Err(invalid("batch_concurrency", "must be between 1 and 16"));
        }

        if self.busy_timeout_ms > self.query_timeout_ms {
            tracing::warn!(
                busy_timeout_ms = self.busy_timeout_ms,
                query_timeout_ms = self.query_timeout_ms,
                "busy timeout exceeds query timeout; locked statements will time out first"
            );
        }

        Ok(())
    }
}

//! Engine descriptors and optional engine capabilities.
//!
//! A [`DbHandle`] knows nothing about a particular database beyond what its
//! [`Engine`] tells it. Engines that need to run setup after the connection is
//! established, prepare before migrations, or report their own statistics do
//! so by returning the matching capability from the `as_*` queries.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::DbHandle;
use super::migrations::Migration;
use crate::Error;

/// Connection parameters for an engine.
///
/// `Display` must never leak secrets; it is written to logs when the handle
/// opens.
pub trait DataSource: fmt::Display + Send + Sync {
    /// Driver-specific connection string.
    fn dsn(&self) -> String;

    /// Default bound for statements run through [`DbHandle::exec_timeout`].
    fn query_timeout(&self) -> Duration;

    fn max_connections(&self) -> usize {
        1
    }

    fn conn_max_lifetime(&self) -> Option<Duration> {
        None
    }
}

/// Describes a database engine to the handle.
pub trait Engine: Send + Sync + 'static {
    /// Short driver name, e.g. `"sqlite"`.
    fn driver(&self) -> &'static str;

    fn data_source(&self) -> &dyn DataSource;

    /// Ordered schema migrations for this engine.
    fn migrations(&self) -> &'static [Migration] {
        &[]
    }

    fn as_after_open(&self) -> Option<&dyn AfterOpen> {
        None
    }

    fn as_before_migrate(&self) -> Option<&dyn BeforeMigrate> {
        None
    }

    fn as_observable(&self) -> Option<&dyn Observable> {
        None
    }
}

/// Runs once the connection is established, before `open` returns.
///
/// A failure here closes the handle and is returned from `open`.
#[async_trait]
pub trait AfterOpen: Send + Sync {
    async fn after_open(&self, db: &DbHandle) -> Result<(), Error>;
}

/// Runs before pending migrations are applied.
#[async_trait]
pub trait BeforeMigrate: Send + Sync {
    async fn before_migrate(&self, db: &DbHandle) -> Result<(), Error>;
}

/// Engine-specific statistics merged into [`DbHandle::stats`].
#[async_trait]
pub trait Observable: Send + Sync {
    async fn stats(&self, db: &DbHandle) -> Result<serde_json::Value, Error>;
}

/// A bare data source for engines that only need a DSN.
#[derive(Debug, Clone)]
pub struct DsnOptions {
    dsn: String,
    query_timeout: Duration,
    max_connections: usize,
    conn_max_lifetime: Option<Duration>,
}

impl DsnOptions {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            query_timeout: Duration::from_secs(30),
            max_connections: 1,
            conn_max_lifetime: None,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_conn_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.conn_max_lifetime = Some(lifetime);
        self
    }
}

impl fmt::Display for DsnOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dsn)
    }
}

impl DataSource for DsnOptions {
    fn dsn(&self) -> String {
        self.dsn.clone()
    }

    fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn conn_max_lifetime(&self) -> Option<Duration> {
        self.conn_max_lifetime
    }
}

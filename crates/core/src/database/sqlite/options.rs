use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Error;
use crate::database::DataSource;

/// Default location of the cache database, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = "scrape_data/scrape.db";

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Negative values are KiB, positive values are pages.
pub const DEFAULT_CACHE_SIZE: i64 = -20_000;

const MEMORY_PATH: &str = ":memory:";

/// SQLite connection options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    path: Option<PathBuf>,
    busy_timeout: Duration,
    journal_mode: String,
    cache_size: i64,
    synchronous: String,
    query_timeout: Duration,
    max_connections: usize,
    auto_create: bool,
}

impl SqliteConfig {
    /// File database at [`DEFAULT_DB_PATH`].
    pub fn new() -> Result<Self, Error> {
        Self::file(DEFAULT_DB_PATH)
    }

    /// Private in-memory database, discarded when the handle closes.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            journal_mode: "MEMORY".to_string(),
            cache_size: DEFAULT_CACHE_SIZE,
            synchronous: "OFF".to_string(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            max_connections: 1,
            auto_create: true,
        }
    }

    /// File database at `path`, creating parent directories.
    ///
    /// The special path `:memory:` selects an in-memory database.
    pub fn file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if path.as_os_str() == MEMORY_PATH {
            return Ok(Self::in_memory());
        }
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidInput("database path is empty".to_string()));
        }

        let path = std::path::absolute(path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(Self {
            path: Some(path),
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
            ..Self::in_memory()
        })
    }

    /// Database file, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_memory(&self) -> bool {
        self.path.is_none()
    }

    pub fn auto_create(&self) -> bool {
        self.auto_create
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_journal_mode(mut self, mode: impl Into<String>) -> Self {
        self.journal_mode = mode.into().to_uppercase();
        self
    }

    pub fn with_cache_size(mut self, cache_size: i64) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn with_synchronous(mut self, mode: impl Into<String>) -> Self {
        self.synchronous = mode.into().to_uppercase();
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Skip applying migrations on open; run [`DbHandle::migrate_up`](crate::database::DbHandle::migrate_up)
    /// yourself.
    pub fn without_auto_create(mut self) -> Self {
        self.auto_create = false;
        self
    }

    /// Pragmas applied after the connection opens.
    pub(crate) fn pragmas(&self) -> String {
        format!(
            "PRAGMA busy_timeout = {};
             PRAGMA auto_vacuum = INCREMENTAL;
             PRAGMA journal_mode = {};
             PRAGMA cache_size = {};
             PRAGMA synchronous = {};
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis(),
            self.journal_mode,
            self.cache_size,
            self.synchronous,
        )
    }
}

fn escape_uri_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '?' => escaped.push_str("%3f"),
            '#' => escaped.push_str("%23"),
            _ => escaped.push(c),
        }
    }
    escaped
}

impl DataSource for SqliteConfig {
    fn dsn(&self) -> String {
        match &self.path {
            Some(path) => format!("file:{}?mode=rwc", escape_uri_path(&path.to_string_lossy())),
            None => "file::memory:?mode=memory".to_string(),
        }
    }

    fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl fmt::Display for SqliteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}&_busy_timeout={}&_journal_mode={}&_cache_size={}&_sync={}",
            self.dsn(),
            self.busy_timeout.as_millis(),
            self.journal_mode,
            self.cache_size,
            self.synchronous,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_path() {
        let config = SqliteConfig::file(":memory:").unwrap();
        assert!(config.is_memory());
        assert_eq!(config.dsn(), "file::memory:?mode=memory");
    }

    #[test]
    fn test_file_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/cache.db");

        let config = SqliteConfig::file(&path).unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert_eq!(config.path(), Some(path.as_path()));
        assert!(config.dsn().starts_with("file:/"));
        assert!(config.dsn().ends_with("cache.db?mode=rwc"));
    }

    #[test]
    fn test_display_includes_settings() {
        let config = SqliteConfig::in_memory().with_busy_timeout(Duration::from_secs(2));
        let shown = config.to_string();
        assert!(shown.contains("_busy_timeout=2000"));
        assert!(shown.contains("_journal_mode=MEMORY"));
    }

    #[test]
    fn test_escape_uri_path() {
        assert_eq!(escape_uri_path("/tmp/a?b#c%d"), "/tmp/a%3fb%23c%25d");
    }

    #[test]
    fn test_empty_path_rejected() {
        assert!(matches!(SqliteConfig::file(""), Err(Error::InvalidInput(_))));
    }
}

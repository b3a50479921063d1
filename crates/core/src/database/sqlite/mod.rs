//! SQLite engine.
//!
//! Applies connection pragmas, runs pending migrations and schedules daily
//! vacuum/optimize maintenance after the handle opens. Also reports database
//! size statistics for [`DbHandle::stats`].

mod options;

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;

pub use options::{DEFAULT_BUSY_TIMEOUT, DEFAULT_CACHE_SIZE, DEFAULT_DB_PATH, DEFAULT_QUERY_TIMEOUT, SqliteConfig};

use super::{AfterOpen, DataSource, DbHandle, Engine, Migration, Observable};
use crate::Error;

/// Schema for the URL content cache.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_urls",
        sql: include_str!("../../../migrations/001_create_urls.sql"),
        down: include_str!("../../../migrations/001_create_urls.down.sql"),
    },
    Migration {
        version: 2,
        name: "create_id_map",
        sql: include_str!("../../../migrations/002_create_id_map.sql"),
        down: include_str!("../../../migrations/002_create_id_map.down.sql"),
    },
    Migration {
        version: 3,
        name: "add_fetch_method",
        sql: include_str!("../../../migrations/003_add_fetch_method.sql"),
        down: include_str!("../../../migrations/003_add_fetch_method.down.sql"),
    },
];

/// How often free pages are reclaimed and the query planner refreshed.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const MAINTENANCE_SQL: &str = "PRAGMA incremental_vacuum; PRAGMA optimize;";

/// Engine statistics are recomputed at most this often.
const STATS_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
struct SqliteStats {
    sqlite_version: String,
    page_count: i64,
    page_size: i64,
    freelist_count: i64,
    max_page_count: i64,
    size_bytes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_size_bytes: Option<u64>,
}

#[derive(Debug)]
pub struct SqliteEngine {
    config: SqliteConfig,
    stats_cache: Mutex<Option<(Instant, serde_json::Value)>>,
}

impl SqliteEngine {
    pub fn new(config: SqliteConfig) -> Self {
        Self { config, stats_cache: Mutex::new(None) }
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    fn cached_stats(&self) -> Option<serde_json::Value> {
        let cache = self.stats_cache.lock().unwrap_or_else(PoisonError::into_inner);
        match cache.as_ref() {
            Some((at, value)) if at.elapsed() < STATS_TTL => Some(value.clone()),
            _ => None,
        }
    }
}

impl Engine for SqliteEngine {
    fn driver(&self) -> &'static str {
        "sqlite"
    }

    fn data_source(&self) -> &dyn DataSource {
        &self.config
    }

    fn migrations(&self) -> &'static [Migration] {
        MIGRATIONS
    }

    fn as_after_open(&self) -> Option<&dyn AfterOpen> {
        Some(self)
    }

    fn as_observable(&self) -> Option<&dyn Observable> {
        Some(self)
    }
}

#[async_trait]
impl AfterOpen for SqliteEngine {
    async fn after_open(&self, db: &DbHandle) -> Result<(), Error> {
        let pragmas = self.config.pragmas();
        db.call(move |conn| Ok(conn.execute_batch(&pragmas)?)).await?;

        if self.config.auto_create() {
            db.migrate_up().await?;
        }

        db.maintenance(MAINTENANCE_INTERVAL, |db| async move {
            tracing::debug!("running sqlite maintenance");
            db.exec_timeout(Duration::ZERO, MAINTENANCE_SQL).await
        })?;

        Ok(())
    }
}

#[async_trait]
impl Observable for SqliteEngine {
    async fn stats(&self, db: &DbHandle) -> Result<serde_json::Value, Error> {
        if let Some(value) = self.cached_stats() {
            return Ok(value);
        }

        let mut stats = db
            .call(|conn| -> Result<SqliteStats, Error> {
                let pragma = |name: &str| conn.pragma_query_value(None, name, |row| row.get::<_, i64>(0));
                let page_count = pragma("page_count")?;
                let page_size = pragma("page_size")?;
                Ok(SqliteStats {
                    sqlite_version: conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?,
                    page_count,
                    page_size,
                    freelist_count: pragma("freelist_count")?,
                    max_page_count: pragma("max_page_count")?,
                    size_bytes: page_count * page_size,
                    file_size_bytes: None,
                })
            })
            .await?;

        if let Some(path) = self.config.path() {
            stats.file_size_bytes = std::fs::metadata(path).map(|m| m.len()).ok();
        }

        let value = serde_json::to_value(&stats)?;
        *self.stats_cache.lock().unwrap_or_else(PoisonError::into_inner) = Some((Instant::now(), value.clone()));
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_open_applies_schema_and_maintenance() {
        let db = DbHandle::new(SqliteEngine::new(SqliteConfig::in_memory()));
        db.open(CancellationToken::new()).await.unwrap();

        assert_eq!(db.maintenance_task_count(), 1);

        let version: i64 = db
            .call(|conn| Ok(conn.query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i64);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_engine_stats() {
        let db = DbHandle::new(SqliteEngine::new(SqliteConfig::in_memory()));
        db.open(CancellationToken::new()).await.unwrap();

        let stats = db.stats().await;
        let engine = stats.engine.expect("sqlite engine is observable");
        assert!(!engine["sqlite_version"].as_str().unwrap().is_empty());
        assert!(engine["page_size"].as_i64().unwrap() > 0);
        assert!(engine.get("file_size_bytes").is_none());
    }

    #[tokio::test]
    async fn test_file_database_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteConfig::file(dir.path().join("scrape.db")).unwrap();

        let db = DbHandle::new(SqliteEngine::new(config.clone()));
        db.open(CancellationToken::new()).await.unwrap();
        db.exec_timeout(Duration::ZERO, "INSERT INTO id_map (requested_id, canonical_id) VALUES (1, 2);")
            .await
            .unwrap();
        let stats = db.stats().await;
        assert!(stats.engine.unwrap()["file_size_bytes"].as_u64().is_some());
        db.close().await.unwrap();

        let db = DbHandle::new(SqliteEngine::new(config));
        db.open(CancellationToken::new()).await.unwrap();
        assert_eq!(db.migrate_up().await.unwrap(), 0);
        let canonical: i64 = db
            .call(|conn| {
                Ok(conn.query_row("SELECT canonical_id FROM id_map WHERE requested_id = 1", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(canonical, 2);
    }
}

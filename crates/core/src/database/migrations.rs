//! Versioned schema migrations.
//!
//! Applied migrations are recorded in a `_migrations` table. Each migration
//! (or its reversal) runs in its own transaction together with its
//! bookkeeping row, so a failing script leaves the schema at the previous
//! version.

use serde::Serialize;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::Connection;

use super::DbHandle;
use crate::Error;

/// One migration script.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Strictly increasing version number.
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
    /// Reverses `sql`.
    pub down: &'static str,
}

/// A known migration and when it was applied, if ever.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub version: i64,
    pub name: &'static str,
    pub applied_at: Option<String>,
}

const CREATE_MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
)";

impl DbHandle {
    /// Apply pending migrations, returning how many ran.
    pub async fn migrate_up(&self) -> Result<usize, Error> {
        if let Some(hook) = self.inner.engine.as_before_migrate() {
            hook.before_migrate(self).await?;
        }

        let migrations = self.inner.engine.migrations();
        let applied = self
            .call(move |conn| -> Result<usize, Error> {
                conn.execute(CREATE_MIGRATIONS_TABLE, [])?;

                let current: i64 =
                    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

                let mut applied = 0;
                for migration in migrations.iter().filter(|m| m.version > current) {
                    let tx = conn.transaction()?;
                    tx.execute_batch(migration.sql).map_err(|e| {
                        Error::MigrationFailed(format!("{:03}_{}: {e}", migration.version, migration.name))
                    })?;
                    tx.execute(
                        "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                        params![migration.version, migration.name, chrono::Utc::now().to_rfc3339()],
                    )?;
                    tx.commit()?;
                    applied += 1;
                }
                Ok(applied)
            })
            .await?;

        if applied > 0 {
            tracing::info!(applied, "applied migrations");
        }
        Ok(applied)
    }

    /// Revert the most recently applied migration, returning its version.
    /// `None` when nothing is applied.
    pub async fn migrate_down(&self) -> Result<Option<i64>, Error> {
        let migrations = self.inner.engine.migrations();
        let reverted = self
            .call(move |conn| {
                conn.execute(CREATE_MIGRATIONS_TABLE, [])?;
                revert_latest(conn, migrations)
            })
            .await?;

        if let Some(version) = reverted {
            tracing::info!(version, "reverted migration");
        }
        Ok(reverted)
    }

    /// Revert every applied migration, newest first, returning how many ran.
    pub async fn migrate_reset(&self) -> Result<usize, Error> {
        let migrations = self.inner.engine.migrations();
        let reverted = self
            .call(move |conn| -> Result<usize, Error> {
                conn.execute(CREATE_MIGRATIONS_TABLE, [])?;
                let mut reverted = 0;
                while revert_latest(conn, migrations)?.is_some() {
                    reverted += 1;
                }
                Ok(reverted)
            })
            .await?;

        tracing::info!(reverted, "reset migrations");
        Ok(reverted)
    }

    /// Every known migration with its applied time.
    pub async fn migration_status(&self) -> Result<Vec<MigrationStatus>, Error> {
        let migrations = self.inner.engine.migrations();
        self.call(move |conn| -> Result<Vec<MigrationStatus>, Error> {
            conn.execute(CREATE_MIGRATIONS_TABLE, [])?;
            let mut stmt = conn.prepare("SELECT applied_at FROM _migrations WHERE version = ?1")?;

            let mut statuses = Vec::with_capacity(migrations.len());
            for migration in migrations {
                let applied_at = match stmt.query_row(params![migration.version], |row| row.get::<_, String>(0)) {
                    Ok(at) => Some(at),
                    Err(tokio_rusqlite::rusqlite::Error::QueryReturnedNoRows) => None,
                    Err(e) => return Err(e.into()),
                };
                statuses.push(MigrationStatus { version: migration.version, name: migration.name, applied_at });
            }
            Ok(statuses)
        })
        .await
    }
}

fn revert_latest(conn: &mut Connection, migrations: &[Migration]) -> Result<Option<i64>, Error> {
    let latest: Option<i64> = conn.query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))?;
    let Some(version) = latest else {
        return Ok(None);
    };
    let migration = migrations
        .iter()
        .find(|m| m.version == version)
        .ok_or_else(|| Error::MigrationFailed(format!("no script for applied version {version}")))?;

    let tx = conn.transaction()?;
    tx.execute_batch(migration.down)
        .map_err(|e| Error::MigrationFailed(format!("revert {:03}_{}: {e}", migration.version, migration.name)))?;
    tx.execute("DELETE FROM _migrations WHERE version = ?1", params![version])?;
    tx.commit()?;
    Ok(Some(version))
}

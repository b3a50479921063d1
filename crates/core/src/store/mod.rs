//! Persistent URL content store.
//!
//! Pages are stored under the key of their canonical URL. Every save also
//! records an alias from the requested URL's key to the canonical key, so a
//! later lookup by either URL finds the same content.
//!
//! Expiry is lazy: expired rows stay on disk and read as not found.

pub mod key;

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};
use url::Url;

pub use key::StorageKey;

use crate::Error;
use crate::database::DbHandle;
use crate::resource::{DEFAULT_TTL, FetchMethod, WebPage};

const SAVE_SQL: &str = "REPLACE INTO urls (id, url, parsed_url, fetch_time, expires, metadata, content_text, fetch_method)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";
const SAVE_ALIAS_SQL: &str = "REPLACE INTO id_map (requested_id, canonical_id) VALUES (?1, ?2)";
const LOOKUP_ALIAS_SQL: &str = "SELECT canonical_id FROM id_map WHERE requested_id = ?1";
const FETCH_SQL: &str = "SELECT url, parsed_url, fetch_time, expires, metadata, content_text, fetch_method
     FROM urls WHERE id = ?1";
const DELETE_SQL: &str = "DELETE FROM urls WHERE id = ?1";
const CLEAR_SQL: &str = "DELETE FROM urls; DELETE FROM id_map;";

/// A `urls` row as stored.
struct StoredRow {
    url: String,
    parsed_url: String,
    fetch_time: i64,
    expires: i64,
    metadata: String,
    content_text: String,
    fetch_method: String,
}

fn changed_rows(rows: usize) -> Error {
    Error::from(rusqlite::Error::StatementChangedRows(rows))
}

fn parse_stored_url(raw: &str) -> Result<Url, Error> {
    Url::parse(raw).map_err(|e| Error::InvalidUrl(format!("stored url {raw:?}: {e}")))
}

/// Content store over a [`DbHandle`].
#[derive(Debug, Clone)]
pub struct UrlStore {
    db: DbHandle,
    default_ttl: Duration,
}

impl UrlStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db, default_ttl: DEFAULT_TTL }
    }

    /// TTL applied to pages saved without one.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn database(&self) -> &DbHandle {
        &self.db
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Save `page` under its canonical URL and alias its requested URL.
    ///
    /// Returns the canonical key. A failed alias write is returned as an
    /// error but the content row is kept.
    pub async fn save(&self, page: &WebPage) -> Result<StorageKey, Error> {
        let canonical = page.url().cloned().ok_or_else(|| Error::InvalidInput("page has no URL".to_string()))?;
        let requested = page.requested_url.as_ref().unwrap_or(&canonical);

        let fetch_time = page.fetch_time.unwrap_or_else(|| Utc::now().trunc_subsecs(0));
        let ttl = page.ttl.unwrap_or(self.default_ttl);
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::InvalidInput(format!("ttl {ttl:?}: {e}")))?;
        let expires = fetch_time.timestamp().saturating_add(ttl.num_seconds());

        let key = StorageKey::from_url(&canonical);
        let requested_key = StorageKey::from_url(requested);
        let metadata = serde_json::to_string(&page.metadata)?;

        let values = (
            key.as_i64(),
            canonical.to_string(),
            requested.to_string(),
            fetch_time.timestamp(),
            expires,
            metadata,
            page.content_text.clone(),
            page.fetch_method.to_string(),
        );
        let rows = self
            .db
            .with_statement(
                "urls.save",
                || SAVE_SQL.to_string(),
                move |stmt| {
                    let (id, url, parsed_url, fetch_time, expires, metadata, content_text, fetch_method) = values;
                    Ok(stmt.execute(params![
                        id,
                        url,
                        parsed_url,
                        fetch_time,
                        expires,
                        metadata,
                        content_text,
                        fetch_method
                    ])?)
                },
            )
            .await?;

        let alias = self.save_alias(requested_key, key).await;

        let mut errors = Vec::new();
        if rows != 1 {
            errors.push(changed_rows(rows));
        }
        if let Err(e) = alias {
            errors.push(e);
        }
        Error::join(errors)?;

        tracing::debug!(url = %canonical, requested = %requested, key = %key, "saved page");
        Ok(key)
    }

    async fn save_alias(&self, requested: StorageKey, canonical: StorageKey) -> Result<(), Error> {
        self.db
            .with_statement(
                "id_map.save",
                || SAVE_ALIAS_SQL.to_string(),
                move |stmt| {
                    stmt.execute(params![requested.as_i64(), canonical.as_i64()])?;
                    Ok(())
                },
            )
            .await
    }

    async fn lookup_alias(&self, requested: StorageKey) -> Result<Option<StorageKey>, Error> {
        let canonical = self
            .db
            .with_statement(
                "id_map.lookup",
                || LOOKUP_ALIAS_SQL.to_string(),
                move |stmt| {
                    Ok(stmt.query_row(params![requested.as_i64()], |row| row.get::<_, i64>(0)).optional()?)
                },
            )
            .await?;
        Ok(canonical.map(|id| StorageKey::from_raw(id as u64)))
    }

    /// Look up the live page for `url`, following aliases.
    ///
    /// Missing and expired pages both fail with [`Error::NotFound`].
    pub async fn fetch(&self, url: &Url) -> Result<WebPage, Error> {
        let requested_key = StorageKey::from_url(url);
        let key = match self.lookup_alias(requested_key).await? {
            Some(canonical) => {
                tracing::debug!(url = %url, requested = %requested_key, canonical = %canonical, "found alias");
                canonical
            }
            None => {
                tracing::debug!(url = %url, key = %requested_key, "no alias, using direct key");
                requested_key
            }
        };

        let row = self
            .db
            .with_statement(
                "urls.fetch",
                || FETCH_SQL.to_string(),
                move |stmt| {
                    let row = stmt
                        .query_row(params![key.as_i64()], |row| {
                            Ok(StoredRow {
                                url: row.get(0)?,
                                parsed_url: row.get(1)?,
                                fetch_time: row.get(2)?,
                                expires: row.get(3)?,
                                metadata: row.get(4)?,
                                content_text: row.get(5)?,
                                fetch_method: row.get(6)?,
                            })
                        })
                        .optional()?;
                    Ok(row)
                },
            )
            .await?;

        let Some(row) = row else {
            return Err(Error::NotFound(url.to_string()));
        };
        if Utc::now().timestamp() >= row.expires {
            tracing::debug!(url = %url, key = %key, "stored page expired");
            return Err(Error::NotFound(url.to_string()));
        }

        let fetch_time = DateTime::from_timestamp(row.fetch_time, 0);
        let ttl = u64::try_from(row.expires - row.fetch_time).unwrap_or_default();
        let fetch_method = row.fetch_method.parse::<FetchMethod>().unwrap_or_else(|e| {
            tracing::warn!(error = %e, key = %key, "unknown stored fetch method");
            FetchMethod::Unspecified
        });

        Ok(WebPage {
            canonical_url: Some(parse_stored_url(&row.url)?),
            requested_url: Some(parse_stored_url(&row.parsed_url)?),
            original_url: String::new(),
            ttl: Some(Duration::from_secs(ttl)),
            fetch_time,
            fetch_method,
            metadata: serde_json::from_str(&row.metadata)?,
            content_text: row.content_text,
            error: None,
        })
    }

    /// Delete the page stored directly under `url`'s key.
    ///
    /// Aliases are not followed, so deleting a requested URL that aliases a
    /// different canonical URL removes nothing.
    pub async fn delete(&self, url: &Url) -> Result<bool, Error> {
        let key = StorageKey::from_url(url);
        let rows = self
            .db
            .with_statement(
                "urls.delete",
                || DELETE_SQL.to_string(),
                move |stmt| Ok(stmt.execute(params![key.as_i64()])?),
            )
            .await?;

        match rows {
            0 => Ok(false),
            1 => {
                tracing::debug!(url = %url, key = %key, "deleted page");
                Ok(true)
            }
            n => Err(changed_rows(n)),
        }
    }

    /// Remove every page and alias.
    pub async fn clear(&self) -> Result<(), Error> {
        self.db.exec_timeout(Duration::ZERO, CLEAR_SQL).await?;
        tracing::info!("cleared url store");
        Ok(())
    }
}

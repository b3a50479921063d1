//! Unified error types for the scrape cache.
//!
//! Every variant displays with a stable, upper-case code prefix so callers
//! (and the MCP surface) can classify failures without matching on types.

use std::time::Duration;

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error type for the database handle, store and fetchers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., a page with no URL).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// No live cache entry for the given URL.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Metadata blob could not be encoded or decoded.
    #[error("CACHE_ERROR: metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Filesystem failure preparing the database location.
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("DATABASE_NOT_OPEN")]
    DatabaseNotOpen,

    #[error("DATABASE_ALREADY_OPEN")]
    AlreadyOpen,

    #[error("DATABASE_CLOSED")]
    DatabaseClosed,

    /// Maintenance interval below the allowed minimum.
    #[error("INVALID_DURATION: {0:?}")]
    InvalidDuration(Duration),

    /// Close listener capacity exhausted.
    #[error("LISTENERS_FULL")]
    ListenersFull,

    #[error("QUERY_TIMEOUT: exceeded {0:?}")]
    QueryTimeout(Duration),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// HTTP error response or transport failure.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),

    /// Fetch response too large.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    #[error("UNSUPPORTED_CONTENT_TYPE: {0}")]
    UnsupportedContentType(String),

    /// Content extraction failed.
    #[error("EXTRACT_FAILED: {0}")]
    ExtractFailed(String),

    /// Headless browser rendering failed.
    #[error("RENDER_FAILED: {0}")]
    RenderFailed(String),

    /// The storage-backed fetcher has been drained and accepts no new work.
    #[error("FETCHER_CLOSED")]
    FetcherClosed,

    /// Several failures collected from one operation, e.g. close.
    #[error("{}", joined(.0))]
    Multiple(Vec<Error>),
}

fn joined(errors: &[Error]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
}

impl Error {
    /// Collapse a list of failures into a single result.
    ///
    /// An empty list is success, a single failure is returned as-is.
    pub fn join(mut errors: Vec<Error>) -> Result<(), Error> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether the handle was used outside its open lifetime.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Error::DatabaseNotOpen | Error::AlreadyOpen | Error::DatabaseClosed)
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::DatabaseClosed,
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        match err {
            tokio_rusqlite::Error::ConnectionClosed => Error::DatabaseClosed,
            other => Error::Database(other),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) | Error::InvalidDuration(_) => -32602,
            Error::ExtractFailed(_) | Error::RenderFailed(_) => -32000,
            Error::NotFound(_) => -32001,
            Error::Database(_) | Error::MigrationFailed(_) | Error::Metadata(_) | Error::Io(_) => -32002,
            Error::InvalidUrl(_) => -32003,
            Error::QueryTimeout(_) => -32006,
            Error::FetchTooLarge(_) => -32007,
            Error::HttpError(_) => -32008,
            Error::UnsupportedContentType(_) => -32009,
            e if e.is_lifecycle() => -32010,
            Error::ListenersFull | Error::FetcherClosed => -32010,
            _ => -32603,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}

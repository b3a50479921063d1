//! Statistics reported by [`DbHandle::stats`](super::DbHandle::stats).

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Connection usage. The handle runs a single connection, so the counts are
/// either zero or one apart from `in_use`, which counts queued calls.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub max_open_connections: usize,
    pub open_connections: usize,
    pub in_use: usize,
    pub idle: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub driver: &'static str,
    pub data_source: String,
    pub state: String,
    pub opened_at: Option<DateTime<Utc>>,
    pub prepared_statements: usize,
    pub maintenance_tasks: usize,
    pub connections: PoolStats,
    /// Engine-specific statistics, present when the engine is observable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<serde_json::Value>,
}

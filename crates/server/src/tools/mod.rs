//! MCP tool implementations.
//!
//! This module contains all tools exposed by the scrape server.

pub mod cache;
pub mod web_batch;
pub mod web_fetch;

use rmcp::ErrorData as McpError;
use scrape_core::Error;
use serde::Serialize;

pub use web_batch::{WebBatchParams, batch_impl};
pub use web_fetch::{WebFetchParams, fetch_impl};

/// Pretty JSON for a tool's text content.
pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String, McpError> {
    Ok(serde_json::to_string_pretty(value).map_err(Error::from)?)
}

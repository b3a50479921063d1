//! Storage-related MCP tools.

pub mod delete;
pub mod stats;

pub use delete::{CacheDeleteParams, delete_impl};
pub use stats::stats_impl;

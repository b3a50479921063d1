//! cache_stats tool implementation.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use scrape_core::DbHandle;

use crate::tools::to_json;

/// Report database state, prepared statements and engine statistics.
pub async fn stats_impl(db: &DbHandle) -> Result<CallToolResult, McpError> {
    let stats = db.stats().await;
    Ok(CallToolResult::success(vec![Content::text(to_json(&stats)?)]))
}

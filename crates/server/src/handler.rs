//! MCP server handler implementation.
//!
//! Routes tool calls to the implementations in [`crate::tools`].

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use scrape_core::{BatchOptions, Error, StorageBackedFetcher};

use crate::tools::cache::{CacheDeleteParams, delete_impl, stats_impl};
use crate::tools::{WebBatchParams, WebFetchParams, batch_impl, fetch_impl};

/// The MCP server handler for scrape.
#[derive(Clone)]
pub struct ScrapeServer {
    tool_router: ToolRouter<Self>,
    fetcher: StorageBackedFetcher,
    headless: Option<StorageBackedFetcher>,
    batch: BatchOptions,
}

#[tool_router]
impl ScrapeServer {
    pub fn new(fetcher: StorageBackedFetcher, batch: BatchOptions) -> Self {
        Self { tool_router: Self::tool_router(), fetcher, headless: None, batch }
    }

    /// Serve `headless: true` requests through `fetcher`, which shares
    /// storage with the default fetcher.
    pub fn with_headless(mut self, fetcher: StorageBackedFetcher) -> Self {
        self.headless = Some(fetcher);
        self
    }

    #[tool(description = "Fetch a web page and return its metadata and readable text as JSON. \
        Pages are served from local storage until they expire.")]
    async fn web_fetch(&self, params: Parameters<WebFetchParams>) -> Result<CallToolResult, McpError> {
        let fetcher = match (&self.headless, params.0.headless) {
            (_, false) => &self.fetcher,
            (Some(headless), true) => headless,
            (None, true) => return Err(Error::InvalidInput("headless fetching is not enabled".into()).into()),
        };
        fetch_impl(fetcher, params.0).await
    }

    #[tool(description = "Fetch up to 100 web pages. Returns one page per URL in input order; \
        failed URLs carry an error message.")]
    async fn web_batch(&self, params: Parameters<WebBatchParams>) -> Result<CallToolResult, McpError> {
        batch_impl(&self.fetcher, self.batch, params.0).await
    }

    #[tool(description = "Remove the stored copy of a URL so the next fetch goes to the network.")]
    async fn cache_delete(&self, params: Parameters<CacheDeleteParams>) -> Result<CallToolResult, McpError> {
        delete_impl(&self.fetcher, params.0).await
    }

    #[tool(description = "Report storage statistics: database state, size and prepared statements.")]
    async fn cache_stats(&self) -> Result<CallToolResult, McpError> {
        stats_impl(self.fetcher.database()).await
    }
}

impl ServerHandler for ScrapeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "scrape".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{CannedFetcher, storage_backed};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_lists_all_tools() {
        let server = ScrapeServer::new(storage_backed(Arc::new(CannedFetcher::default())).await, BatchOptions::default());
        let mut names: Vec<String> = server.tool_router.list_all().into_iter().map(|t| t.name.to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["cache_delete", "cache_stats", "web_batch", "web_fetch"]);
    }

    #[tokio::test]
    async fn test_headless_requires_alternate_fetcher() {
        let fetcher = storage_backed(Arc::new(CannedFetcher::default())).await;
        let server = ScrapeServer::new(fetcher.clone(), BatchOptions::default());
        let params = WebFetchParams { url: "https://example.com/".into(), headless: true };

        let err = server.web_fetch(Parameters(params.clone())).await.unwrap_err();
        assert_eq!(err.code.0, -32602);

        let alternate = Arc::new(CannedFetcher::default());
        let server = server.with_headless(fetcher.with_alternate_fetcher(alternate.clone()).unwrap());
        assert!(server.web_fetch(Parameters(params)).await.is_ok());
        assert_eq!(alternate.calls(), 1);
    }
}

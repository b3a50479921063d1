//! web_fetch tool implementation.
//!
//! Serves a URL from storage when fresh, otherwise fetches and extracts it
//! and stores the result in the background.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use scrape_client::canonicalize;
use scrape_core::{Error, StorageBackedFetcher};
use serde::{Deserialize, Serialize};

use super::to_json;

/// Input parameters for the web_fetch tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct WebFetchParams {
    /// The URL to fetch. The scheme defaults to https.
    pub url: String,

    /// Render the page in a headless browser instead of a plain HTTP GET.
    /// Only available when the server runs with rendering enabled.
    #[serde(default)]
    pub headless: bool,
}

/// Implementation of the web_fetch tool.
///
/// A failed fetch is still answered with the partial page, flagged as a tool
/// error, so the caller sees the status code alongside the message.
pub async fn fetch_impl(fetcher: &StorageBackedFetcher, params: WebFetchParams) -> Result<CallToolResult, McpError> {
    if params.url.trim().is_empty() {
        return Err(Error::InvalidInput("url cannot be empty".into()).into());
    }
    let url = canonicalize(&params.url).map_err(Error::from)?;

    let (mut page, failed) = match fetcher.fetch(&url).await {
        Ok(page) => (page, false),
        Err(failure) => {
            tracing::info!(url = %url, error = %failure, "web_fetch failed");
            (failure.into_page(), true)
        }
    };
    page.original_url = params.url;

    let content = vec![Content::text(to_json(&page)?)];
    Ok(if failed { CallToolResult::error(content) } else { CallToolResult::success(content) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{CannedFetcher, json_of, storage_backed};
    use std::sync::Arc;

    fn params(url: &str) -> WebFetchParams {
        WebFetchParams { url: url.into(), ..Default::default() }
    }

    #[tokio::test]
    async fn test_fetch_empty_url() {
        let fetcher = storage_backed(Arc::new(CannedFetcher::default())).await;
        let err = fetch_impl(&fetcher, params("  ")).await.unwrap_err();
        assert_eq!(err.code.0, -32602);
    }

    #[tokio::test]
    async fn test_fetch_invalid_scheme() {
        let fetcher = storage_backed(Arc::new(CannedFetcher::default())).await;
        let err = fetch_impl(&fetcher, params("ftp://example.com/file")).await.unwrap_err();
        assert_eq!(err.code.0, -32003);
    }

    #[tokio::test]
    async fn test_fetch_then_serve_from_storage() {
        let stub = Arc::new(CannedFetcher::default());
        let fetcher = storage_backed(stub.clone()).await;

        let result = fetch_impl(&fetcher, params("Example.com/post?utm_source=news")).await.unwrap();
        assert_ne!(result.is_error, Some(true));
        let page = json_of(&result);
        assert_eq!(page["requested_url"], "https://example.com/post");
        assert_eq!(page["original_url"], "Example.com/post?utm_source=news");
        assert_eq!(page["title"], "Page /post");
        fetcher.wait().await;

        let again = json_of(&fetch_impl(&fetcher, params("https://example.com/post")).await.unwrap());
        assert_eq!(again["content_text"], "text of https://example.com/post");
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_returns_partial_page() {
        let fetcher = storage_backed(Arc::new(CannedFetcher::default())).await;

        let result = fetch_impl(&fetcher, params("https://example.com/missing")).await.unwrap();
        assert_eq!(result.is_error, Some(true));
        let page = json_of(&result);
        assert_eq!(page["status_code"], 404);
        assert!(page["error"].as_str().unwrap().starts_with("HTTP_ERROR"));
    }
}

//! cache_delete tool implementation.
//!
//! Removes the stored page for a URL so the next fetch goes to the network.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use scrape_client::canonicalize;
use scrape_core::resource::clean_url;
use scrape_core::{Error, StorageBackedFetcher};
use serde::{Deserialize, Serialize};

use crate::tools::to_json;

/// Parameters for the cache_delete tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheDeleteParams {
    /// URL whose stored page should be removed.
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheDeleteOutput {
    /// The URL the page was stored under.
    pub url: String,
    /// False when nothing was stored for the URL.
    pub deleted: bool,
}

/// Implementation of the cache_delete tool.
///
/// Only the page stored directly under the URL is removed. Aliases pointing
/// at it from other requested URLs stay behind and resolve to nothing.
pub async fn delete_impl(fetcher: &StorageBackedFetcher, params: CacheDeleteParams) -> Result<CallToolResult, McpError> {
    let url = clean_url(&canonicalize(&params.url).map_err(Error::from)?);
    let deleted = fetcher.delete(&url).await?;
    tracing::debug!(url = %url, deleted, "cache_delete");

    let output = CacheDeleteOutput { url: url.to_string(), deleted };
    Ok(CallToolResult::success(vec![Content::text(to_json(&output)?)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{CannedFetcher, json_of, storage_backed};
    use crate::tools::{WebFetchParams, fetch_impl};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_delete_stored_page() {
        let stub = Arc::new(CannedFetcher::default());
        let fetcher = storage_backed(stub.clone()).await;
        let fetch = WebFetchParams { url: "https://example.com/a".into(), ..Default::default() };
        fetch_impl(&fetcher, fetch.clone()).await.unwrap();
        fetcher.wait().await;

        let params = CacheDeleteParams { url: "example.com/a?utm_source=mail".into() };
        let output = json_of(&delete_impl(&fetcher, params.clone()).await.unwrap());
        assert_eq!(output["url"], "https://example.com/a");
        assert_eq!(output["deleted"], true);

        let output = json_of(&delete_impl(&fetcher, params).await.unwrap());
        assert_eq!(output["deleted"], false);

        fetch_impl(&fetcher, fetch).await.unwrap();
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn test_delete_invalid_url() {
        let fetcher = storage_backed(Arc::new(CannedFetcher::default())).await;
        let err = delete_impl(&fetcher, CacheDeleteParams { url: String::new() }).await.unwrap_err();
        assert_eq!(err.code.0, -32003);
    }
}

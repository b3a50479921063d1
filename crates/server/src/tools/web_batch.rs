//! web_batch tool implementation.
//!
//! Answers many URLs at once: stored pages come straight from the database,
//! the rest are fetched with bounded concurrency.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use scrape_client::BatchInputs;
use scrape_core::{BatchOptions, Error, StorageBackedFetcher, WebPage};
use serde::{Deserialize, Serialize};

use super::to_json;

/// Upper bound on URLs per call.
pub const MAX_BATCH_URLS: usize = 100;

/// Input parameters for the web_batch tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct WebBatchParams {
    /// URLs to fetch.
    pub urls: Vec<String>,

    /// Maximum number of concurrent fetches (default from server config, max: 16).
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// Batch summary statistics.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Output structure for the web_batch tool.
#[derive(Debug, Clone, Serialize)]
pub struct WebBatchOutput {
    /// One page per input URL, in input order. Failed URLs carry `error`.
    pub pages: Vec<WebPage>,
    pub summary: BatchSummary,
}

/// Implementation of the web_batch tool.
pub async fn batch_impl(
    fetcher: &StorageBackedFetcher, defaults: BatchOptions, params: WebBatchParams,
) -> Result<CallToolResult, McpError> {
    if params.urls.is_empty() {
        return Err(Error::InvalidInput("urls cannot be empty".into()).into());
    }
    if params.urls.len() > MAX_BATCH_URLS {
        return Err(Error::InvalidInput(format!("at most {MAX_BATCH_URLS} urls per batch")).into());
    }
    if params.max_concurrency == Some(0) {
        return Err(Error::InvalidInput("max_concurrency must be at least 1".into()).into());
    }

    let options = BatchOptions { max_concurrency: params.max_concurrency.unwrap_or(defaults.max_concurrency) };
    let mut inputs = BatchInputs::new(params.urls);
    let mut answers: Vec<Option<WebPage>> = (0..inputs.len()).map(|_| None).collect();
    let mut rx = fetcher.batch(inputs.urls(), options);
    while let Some(mut page) = rx.recv().await {
        match inputs.claim(&mut page) {
            Some(index) => answers[index] = Some(page),
            None => tracing::warn!(url = %page.original_url, "batch page matches no input"),
        }
    }
    let pages: Vec<WebPage> = answers.into_iter().flatten().collect();

    let failed = pages.iter().filter(|page| page.is_error()).count();
    let summary = BatchSummary { total: pages.len(), succeeded: pages.len() - failed, failed };
    tracing::debug!(total = summary.total, failed, "web_batch finished");

    let output = WebBatchOutput { pages, summary };
    Ok(CallToolResult::success(vec![Content::text(to_json(&output)?)]))
}

//! scrape MCP server entry point.
//!
//! Boots the MCP server on stdio transport. Logging goes to stderr to avoid
//! interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use scrape_client::{FetchConfig, HttpFetcher};
use scrape_core::database::SqliteEngine;
use scrape_core::{AppConfig, DbHandle, StorageBackedFetcher, UrlStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(db_path = %config.db_path.display(), "starting scrape server on stdio transport");

    let db = DbHandle::new(SqliteEngine::new(config.sqlite()?));
    let shutdown = CancellationToken::new();
    db.open(shutdown.clone()).await?;

    let store = UrlStore::new(db.clone()).with_default_ttl(config.default_ttl());
    let fetcher = StorageBackedFetcher::new(Arc::new(HttpFetcher::new(FetchConfig::from(&config))?), store)?;

    let mut handler = handler::ScrapeServer::new(fetcher.clone(), config.batch_options());
    if config.render_enabled {
        handler = with_renderer(handler, &fetcher).await;
    }

    let server = serve_server(handler, stdio()).await?;
    let reason = server.waiting().await;

    tracing::info!(pending_saves = fetcher.pending_saves(), "shutting down");
    shutdown.cancel();
    fetcher.wait().await;
    db.close().await?;
    reason?;

    Ok(())
}

#[cfg(feature = "render")]
async fn with_renderer(handler: handler::ScrapeServer, fetcher: &StorageBackedFetcher) -> handler::ScrapeServer {
    use scrape_client::{HeadlessFetcher, RenderOptions};

    let headless = match HeadlessFetcher::launch(RenderOptions::default()).await {
        Ok(headless) => headless,
        Err(e) => {
            tracing::warn!(error = %e, "headless browser unavailable, serving direct fetches only");
            return handler;
        }
    };
    match fetcher.with_alternate_fetcher(Arc::new(headless)) {
        Ok(alternate) => handler.with_headless(alternate),
        Err(e) => {
            tracing::warn!(error = %e, "could not attach headless fetcher");
            handler
        }
    }
}

#[cfg(not(feature = "render"))]
async fn with_renderer(handler: handler::ScrapeServer, _fetcher: &StorageBackedFetcher) -> handler::ScrapeServer {
    tracing::warn!("render_enabled is set but this build has no render feature");
    handler
}

//! Subcommand implementations.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use scrape_client::{BatchInputs, FetchConfig, HttpFetcher, canonicalize};
use scrape_core::database::SqliteEngine;
use scrape_core::resource::clean_url;
use scrape_core::{AppConfig, BatchOptions, DbHandle, StorageBackedFetcher, UrlStore};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::Commands;

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// URLs to fetch; the scheme defaults to https
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Concurrent fetches for URLs missing from storage
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Render pages in a headless browser
    #[arg(long)]
    pub headless: bool,
}

/// Open the configured database, run `command` and close the database again.
pub(crate) async fn execute(command: Commands, config: &AppConfig, out: &mut impl Write) -> Result<()> {
    let mut sqlite = config.sqlite()?;
    if matches!(command, Commands::Migrate { .. }) {
        sqlite = sqlite.without_auto_create();
    }

    let db = DbHandle::new(SqliteEngine::new(sqlite));
    db.open(CancellationToken::new())
        .await
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;

    let result = match command {
        Commands::Fetch(args) => fetch(&db, config, args, out).await,
        Commands::Delete { url } => delete(&db, &url, out).await,
        Commands::Clear { yes } => clear(&db, yes, out).await,
        Commands::Migrate { down, reset } => migrate(&db, down, reset, out).await,
        Commands::Stats => stats(&db, out).await,
    };

    let closed = db.close().await;
    result?;
    closed?;
    Ok(())
}

async fn fetch(db: &DbHandle, config: &AppConfig, args: FetchArgs, out: &mut impl Write) -> Result<()> {
    let store = UrlStore::new(db.clone()).with_default_ttl(config.default_ttl());
    let mut fetcher = StorageBackedFetcher::new(Arc::new(HttpFetcher::new(FetchConfig::from(config))?), store)?;
    if args.headless {
        fetcher = headless(&fetcher).await?;
    }

    let mut inputs = BatchInputs::new(args.urls);
    let options = BatchOptions { max_concurrency: args.concurrency.unwrap_or(config.batch_concurrency) };

    let mut failed = 0usize;
    let mut pages = fetcher.batch(inputs.urls(), options);
    while let Some(mut page) = pages.recv().await {
        if inputs.claim(&mut page).is_none() {
            tracing::warn!(url = %page.original_url, "batch page matches no input");
        }
        failed += usize::from(page.is_error());
        writeln!(out, "{}", serde_json::to_string(&page)?)?;
    }

    fetcher.wait().await;
    if failed > 0 {
        tracing::warn!(failed, total = inputs.len(), "some URLs could not be fetched");
    }
    Ok(())
}

#[cfg(feature = "render")]
async fn headless(fetcher: &StorageBackedFetcher) -> Result<StorageBackedFetcher> {
    use scrape_client::{HeadlessFetcher, RenderOptions};

    let browser = HeadlessFetcher::launch(RenderOptions::default()).await?;
    let alternate = fetcher.with_alternate_fetcher(Arc::new(browser))?;
    Ok(alternate)
}

#[cfg(not(feature = "render"))]
async fn headless(_fetcher: &StorageBackedFetcher) -> Result<StorageBackedFetcher> {
    bail!("this build has no headless browser support")
}

async fn delete(db: &DbHandle, url: &str, out: &mut impl Write) -> Result<()> {
    let url = clean_url(&canonicalize(url)?);
    let deleted = UrlStore::new(db.clone()).delete(&url).await?;
    writeln!(out, "{}", json!({ "url": url, "deleted": deleted }))?;
    Ok(())
}

async fn clear(db: &DbHandle, yes: bool, out: &mut impl Write) -> Result<()> {
    if !yes {
        bail!("refusing to clear every stored page without --yes");
    }
    UrlStore::new(db.clone()).clear().await?;
    writeln!(out, "{}", json!({ "cleared": true }))?;
    Ok(())
}

async fn migrate(db: &DbHandle, down: bool, reset: bool, out: &mut impl Write) -> Result<()> {
    if reset {
        let reverted = db.migrate_reset().await?;
        tracing::info!(reverted, "migrations reverted");
    } else if down {
        let reverted = db.migrate_down().await?;
        tracing::info!(?reverted, "migration reverted");
    } else {
        let applied = db.migrate_up().await?;
        tracing::info!(applied, "migrations complete");
    }
    for status in db.migration_status().await? {
        writeln!(out, "{}", serde_json::to_string(&status)?)?;
    }
    Ok(())
}

async fn stats(db: &DbHandle, out: &mut impl Write) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(&db.stats().await)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn file_config(dir: &tempfile::TempDir) -> AppConfig {
        AppConfig { db_path: dir.path().join("nested/scrape.db"), ..AppConfig::default() }
    }

    async fn run(command: Commands, config: &AppConfig) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        execute(command, config, &mut out).await?;
        let text = String::from_utf8(out)?;
        Ok(text.lines().map(|line| serde_json::from_str(line).unwrap()).collect())
    }

    #[tokio::test]
    async fn test_migrate_reports_every_version() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);

        let lines = run(Commands::Migrate { down: false, reset: false }, &config).await.unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|status| !status["applied_at"].is_null()));
        assert_eq!(lines[0]["version"], 1);

        let again = run(Commands::Migrate { down: false, reset: false }, &config).await.unwrap();
        assert_eq!(again, lines);
    }

    #[tokio::test]
    async fn test_migrate_down_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);
        run(Commands::Migrate { down: false, reset: false }, &config).await.unwrap();

        let lines = run(Commands::Migrate { down: true, reset: false }, &config).await.unwrap();
        assert!(lines[2]["applied_at"].is_null());
        assert!(!lines[1]["applied_at"].is_null());

        let lines = run(Commands::Migrate { down: false, reset: true }, &config).await.unwrap();
        assert!(lines.iter().all(|status| status["applied_at"].is_null()));
    }

    #[tokio::test]
    async fn test_fetch_invalid_url_prints_error_page() {
        let dir = tempfile::tempdir().unwrap();
        let args = FetchArgs { urls: vec!["not a url".into()], concurrency: None, headless: false };

        let lines = run(Commands::Fetch(args), &file_config(&dir)).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["original_url"], "not a url");
        assert!(lines[0]["error"].as_str().unwrap().starts_with("INVALID_URL"));
    }

    #[tokio::test]
    async fn test_fetch_duplicate_inputs_each_answered() {
        let dir = tempfile::tempdir().unwrap();
        let urls = vec!["127.0.0.1:1/x".to_string(), "https://127.0.0.1:1/x".to_string()];
        let args = FetchArgs { urls: urls.clone(), concurrency: None, headless: false };

        let lines = run(Commands::Fetch(args), &file_config(&dir)).await.unwrap();
        let mut originals: Vec<&str> = lines.iter().map(|line| line["original_url"].as_str().unwrap()).collect();
        originals.sort_unstable();
        assert_eq!(originals, urls);
        assert!(lines.iter().all(|line| line["error"].is_string()));
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);

        let lines = run(Commands::Delete { url: "Example.com/a?utm_source=x".into() }, &config).await.unwrap();
        assert_eq!(lines[0]["url"], "https://example.com/a");
        assert_eq!(lines[0]["deleted"], false);

        assert!(run(Commands::Clear { yes: false }, &config).await.is_err());
        let lines = run(Commands::Clear { yes: true }, &config).await.unwrap();
        assert_eq!(lines[0]["cleared"], true);
    }

    #[tokio::test]
    async fn test_stats_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        execute(Commands::Stats, &file_config(&dir), &mut out).await.unwrap();

        let stats: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(stats["driver"], "sqlite");
        assert_eq!(stats["state"], "open");
        assert!(stats["engine"]["file_size_bytes"].as_u64().is_some());
    }
}

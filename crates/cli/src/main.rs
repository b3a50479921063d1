//! scrape command line entry point.
//!
//! Page output goes to stdout as JSON lines; logs go to stderr.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Fetch web pages into a local SQLite store and manage that store.
#[derive(Parser, Debug)]
#[command(name = "scrape")]
#[command(version)]
#[command(about = "Fetch, extract and store web pages", long_about = None)]
struct Cli {
    /// SQLite database path, or :memory:
    #[arg(long, global = true, env = "SCRAPE_DB_PATH")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch one or more URLs, printing one JSON page per line
    Fetch(commands::FetchArgs),

    /// Remove the stored page for a URL
    Delete {
        url: String,
    },

    /// Remove every stored page
    Clear {
        /// Required; clearing cannot be undone
        #[arg(long)]
        yes: bool,
    },

    /// Apply pending schema migrations and print their status
    Migrate {
        /// Revert the most recent migration instead
        #[arg(long, conflicts_with = "reset")]
        down: bool,

        /// Revert every migration, dropping all stored pages
        #[arg(long)]
        reset: bool,
    },

    /// Print database statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let mut config = scrape_core::AppConfig::load()?;
    if let Some(database) = cli.database {
        config.db_path = database;
    }

    commands::execute(cli.command, &config, &mut std::io::stdout().lock()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch_with_global_database() {
        let cli = Cli::try_parse_from(["scrape", "fetch", "a.com", "b.com", "--concurrency", "2", "--database", "x.db"])
            .unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("x.db")));
        match cli.command {
            Commands::Fetch(args) => {
                assert_eq!(args.urls, vec!["a.com", "b.com"]);
                assert_eq!(args.concurrency, Some(2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_fetch_requires_url() {
        assert!(Cli::try_parse_from(["scrape", "fetch"]).is_err());
    }

    #[test]
    fn test_parse_migrate_flags() {
        let cli = Cli::try_parse_from(["scrape", "migrate", "--down"]).unwrap();
        assert!(matches!(cli.command, Commands::Migrate { down: true, reset: false }));
        assert!(Cli::try_parse_from(["scrape", "migrate", "--down", "--reset"]).is_err());
    }

    #[test]
    fn test_parse_clear() {
        let cli = Cli::try_parse_from(["scrape", "clear", "--yes"]).unwrap();
        assert!(matches!(cli.command, Commands::Clear { yes: true }));
    }
}

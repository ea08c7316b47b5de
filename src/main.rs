//! feedsync - incremental feed-to-catalog synchronizer

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;

use feedsync::catalog::{CatalogStore, JsonCatalog, LedgerAssetResolver};
use feedsync::config::SyncConfig;
use feedsync::cursor::SyncCursor;
use feedsync::feed::FeedClient;
use feedsync::maintenance::{self, PurgeOptions};
use feedsync::orchestrator::{BatchOptions, Orchestrator};
use feedsync::snapshot::{self, HashSnapshot};
use feedsync::{lock, logging, server, StatePaths};

#[derive(Parser, Debug)]
#[command(name = "feedsync")]
#[command(author, version, about = "Incremental supplier-feed synchronizer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: <state dir>/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to daily files under this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one sync batch
    Run {
        /// Override the configured batch size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Zero the cursor before running
        #[arg(long)]
        reset: bool,
    },

    /// Serve the HTTP trigger endpoint
    Serve,

    /// Show cursor, lock, snapshot, and catalog state
    Status,

    /// Fetch the items feed and report what changed since the last snapshot
    Diff,

    /// Reset the sync cursor to zero
    Reset,

    /// Preview or delete imported entries, one page at a time
    Purge {
        /// Entries per page
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Delete the page (default is a dry-run preview)
        #[arg(long)]
        execute: bool,

        /// Start from this offset instead of the stored one
        #[arg(long)]
        offset: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    logging::init(cli.verbose, cli.log_dir.as_deref()).context("initializing logging")?;

    let config = SyncConfig::load(cli.config.as_deref()).context("loading configuration")?;
    feedsync::ensure_state_dir().context("creating state directory")?;
    let paths = StatePaths::resolve(&config);

    match cli.command {
        Commands::Run { batch_size, reset } => {
            config.validate()?;
            let orchestrator = build_orchestrator(&config, &paths)?;
            let report = orchestrator
                .run_batch(BatchOptions { batch_size, reset })
                .await?;
            print_json(&report)?;
        },

        Commands::Serve => {
            config.validate()?;
            let orchestrator = Arc::new(build_orchestrator(&config, &paths)?);
            server::serve(orchestrator, &config.host, config.port)
                .await
                .context("running trigger server")?;
        },

        Commands::Status => {
            let offset = SyncCursor::new(paths.cursor.clone()).offset()?;
            let snapshot = HashSnapshot::load(&paths.snapshot, config.hash_algorithm);
            let catalog = JsonCatalog::open(feedsync::state_file("catalog"))?;
            let (_, catalog_entries) = catalog.list_entries(0, 0).await?;

            print_json(&json!({
                "offset": offset,
                "lock": lock::read_info(&paths.lock),
                "snapshot_entries": snapshot.len(),
                "snapshot_algorithm": snapshot.algorithm,
                "catalog_entries": catalog_entries,
            }))?;
        },

        Commands::Diff => {
            config.validate()?;
            let client = FeedClient::new(Duration::from_secs(config.http_timeout_secs))?;
            let aux = client.fetch_aux(&config.feeds).await;
            let records = client.fetch_records(&config.feeds.items, "items").await?;

            let stored = HashSnapshot::load(&paths.snapshot, config.hash_algorithm);
            let current =
                HashSnapshot::build(&records, config.key_field(), &aux, config.hash_algorithm);
            let diff = snapshot::diff(&stored, &current);

            print_json(&json!({
                "total_records": records.len(),
                "added": diff.added,
                "removed": diff.removed,
                "changed": diff.changed,
                "unchanged": diff.unchanged.len(),
            }))?;
        },

        Commands::Reset => {
            SyncCursor::new(paths.cursor.clone()).reset()?;
            print_json(&json!({ "reset": true, "offset": 0 }))?;
        },

        Commands::Purge {
            limit,
            execute,
            offset,
        } => {
            let catalog = JsonCatalog::open(feedsync::state_file("catalog"))?;
            let report = maintenance::run_purge(
                &catalog,
                &paths,
                config.lock_ttl_secs,
                PurgeOptions {
                    limit,
                    execute,
                    offset,
                },
            )
            .await?;
            print_json(&report)?;
        },
    }

    Ok(())
}

fn build_orchestrator(config: &SyncConfig, paths: &StatePaths) -> anyhow::Result<Orchestrator> {
    let client =
        FeedClient::new(Duration::from_secs(config.http_timeout_secs)).context("building HTTP client")?;
    let catalog = Arc::new(
        JsonCatalog::open(feedsync::state_file("catalog")).context("opening catalog store")?,
    );
    let assets = Arc::new(
        LedgerAssetResolver::open(feedsync::state_file("assets"), client.http())
            .context("opening asset ledger")?,
    );
    Ok(Orchestrator::new(
        config.clone(),
        paths.clone(),
        client,
        catalog,
        assets,
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

//! # trac-sync CLI
//!
//! Batch commands for keeping a search index in step with a Trac tracker.
//!
//! ## Usage
//!
//! ```bash
//! trac-sync --config ./config/trac-sync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trac-sync sync <id>...` | Index tickets from the tracker into the hub index |
//! | `trac-sync delete <id>` | Delete a ticket document from the hub index |
//! | `trac-sync stats --start <ms> --end <ms>` | Replay a window into the local index and store its snapshot |
//! | `trac-sync check-config` | Validate and print the configuration |
//!
//! ## Logging
//!
//! Progress is logged to stderr. `TRAC_SYNC_LOG` takes an `EnvFilter`
//! directive and `TRAC_SYNC_LOG_FORMAT=json` switches to JSON lines.

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trac_sync::config::{self, Config};
use trac_sync::history::{WindowIndices, WindowJob};
use trac_sync::index::ElasticClient;
use trac_sync::sync::TicketSync;
use trac_sync::tracker::TracRpcClient;

/// trac-sync: batch ETL from a Trac tracker into a search index.
#[derive(Parser)]
#[command(
    name = "trac-sync",
    about = "trac-sync: batch ETL from a Trac tracker into a search index",
    version,
    long_about = "Indexes Trac tickets with their full change history, and computes daily \
    statistics by replaying ticket history into a separate local index."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/trac-sync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index tickets into the hub index.
    ///
    /// Tickets are processed in the given order. The run stops at the
    /// first ticket that cannot be indexed. Tickets the tracker does not
    /// know are skipped.
    Sync {
        /// Ticket ids.
        #[arg(required = true)]
        ids: Vec<u64>,
    },

    /// Delete a ticket document from the hub index.
    Delete {
        /// Ticket id.
        id: u64,
    },

    /// Run the history and stats job for a window.
    ///
    /// Resets tickets created in `(start, end]` to their created state in
    /// the local index, applies updates made in the window, and stores the
    /// stats snapshot for the start date.
    Stats {
        /// Window start, epoch milliseconds (exclusive).
        #[arg(long)]
        start: i64,

        /// Window end, epoch milliseconds (inclusive).
        #[arg(long)]
        end: i64,
    },

    /// Validate the configuration and print it with secrets masked.
    CheckConfig,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TRAC_SYNC_LOG")
        .unwrap_or_else(|_| EnvFilter::new("trac_sync=info,warn"));

    let format = env::var("TRAC_SYNC_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Sync { ids } => run_sync(&cfg, &ids).await?,
        Commands::Delete { id } => run_delete(&cfg, id).await?,
        Commands::Stats { start, end } => run_stats(&cfg, start, end).await?,
        Commands::CheckConfig => {
            let shown = toml::to_string_pretty(&cfg.redacted())
                .context("Failed to render config")?;
            print!("{}", shown);
            println!("ok");
        }
    }

    Ok(())
}

async fn run_sync(cfg: &Config, ids: &[u64]) -> anyhow::Result<()> {
    let tracker = TracRpcClient::new(&cfg.tracker)?;
    let hub = ElasticClient::new(&cfg.hub.hosts, cfg.hub.timeout_secs)?;
    let sync = TicketSync::new(&tracker, &hub, &cfg.tracker.base_url, &cfg.hub.index);

    let summary = sync.sync_tickets(ids).await?;

    println!("sync {}", cfg.hub.index);
    println!("  requested: {} tickets", ids.len());
    println!("  indexed: {}", summary.indexed);
    println!("  re-encoded: {}", summary.reencoded);
    println!("  skipped (not found): {}", summary.skipped);
    println!("ok");
    Ok(())
}

async fn run_delete(cfg: &Config, id: u64) -> anyhow::Result<()> {
    // Deleting never talks to the tracker, but TicketSync wants one
    let tracker = TracRpcClient::new(&cfg.tracker)?;
    let hub = ElasticClient::new(&cfg.hub.hosts, cfg.hub.timeout_secs)?;
    let sync = TicketSync::new(&tracker, &hub, &cfg.tracker.base_url, &cfg.hub.index);

    let existed = sync.delete_ticket(id).await?;
    println!("delete #{}", id);
    println!("  existed: {}", existed);
    println!("ok");
    Ok(())
}

async fn run_stats(cfg: &Config, start: i64, end: i64) -> anyhow::Result<()> {
    let hub = ElasticClient::new(&cfg.hub.hosts, cfg.hub.timeout_secs)?;
    let local = ElasticClient::new(&cfg.local.hosts, cfg.local.timeout_secs)?;
    let indices = WindowIndices {
        hub: &cfg.hub.index,
        local: &cfg.local.index,
        stats: &cfg.local.stats_index,
    };

    let report = WindowJob::new(&hub, &local, indices, &cfg.stats)
        .run(start, end)
        .await?;

    println!("stats {} .. {}", start, end);
    println!("  tickets reset: {}", report.tickets_reset);
    println!("  updates applied: {}", report.updates_applied);
    println!("  updates skipped: {}", report.updates_skipped);
    println!("  total tickets: {}", report.snapshot.total);
    println!("  open tickets: {}", report.snapshot.open);
    println!("ok");
    Ok(())
}

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use seatplan_sync::config::SyncConfig;
use seatplan_sync::engine::SyncEngine;
use seatplan_sync::error::SyncError;
use seatplan_sync::model::EntityKind;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("poll failed for {0}")]
    PollFailed(String),
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "seatplan-sync", about = "Seating plan sync engine")]
struct Cli {
    #[arg(long, env = "SEATPLAN_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "SEATPLAN_CACHE_PATH")]
    cache_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every collection once and print a summary.
    Pull,
    /// Run the engine and log collection sizes on every change.
    Watch {
        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        seconds: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url.trim_end_matches('/').to_owned();
    }
    if cli.cache_path.is_some() {
        config.cache_path = cli.cache_path;
    }
    let engine = SyncEngine::from_config(config)?;

    match cli.command {
        Command::Pull => run_pull(&engine).await,
        Command::Watch { seconds } => run_watch(&engine, seconds.map(Duration::from_secs)).await,
    }
}

async fn run_pull(engine: &SyncEngine) -> Result<(), CliError> {
    if let Err(e) = engine.restore_cache().await {
        tracing::warn!(error = %e, code = e.error_code(), "cache ignored");
    }
    let reports = engine.poll_all().await;
    let counts = engine.store().read(|s| (s.items().len(), s.seats().len(), s.guests().len()));

    let summary = json!({
        "items": { "count": counts.0, "poll": reports.items },
        "seats": { "count": counts.1, "poll": reports.seats },
        "guests": { "count": counts.2, "poll": reports.guests },
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if engine.config().cache_path.is_some() {
        engine.save_cache().await?;
    }

    let failed = EntityKind::ALL
        .into_iter()
        .filter(|kind| reports.get(*kind).is_none())
        .map(|kind| kind.to_string())
        .collect::<Vec<_>>();
    if failed.is_empty() { Ok(()) } else { Err(CliError::PollFailed(failed.join(", "))) }
}

async fn run_watch(engine: &SyncEngine, limit: Option<Duration>) -> Result<(), CliError> {
    engine.start().await;
    let mut revisions = engine.subscribe();
    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                let (items, seats, guests) = engine.store().read(|s| (s.items().len(), s.seats().len(), s.guests().len()));
                let pending = engine.pending_counts().total();
                tracing::info!(items, seats, guests, pending, "store changed");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            () = &mut deadline => break,
        }
    }

    engine.flush_all().await;
    engine.shutdown().await;
    Ok(())
}

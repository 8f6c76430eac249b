//! Roster Sync Daemon
//!
//! Mirrors an account/contact roster into a persistent resource graph.
//! Roster events are read from stdin as one JSON object per line.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! directory-events | roster-sync
//!
//! # Start with custom config
//! roster-sync --config /path/to/config.toml
//!
//! # Custom store directory and a shorter write-back window
//! roster-sync --store-dir /data/roster --quiescence-ms 200
//! ```
//!
//! Pending writes are flushed when stdin closes or on Ctrl+C.

use anyhow::Context;
use clap::Parser;
use roster_sync::{Config, Controller, RosterEvent, SledStore};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "roster-sync")]
#[command(about = "Write-back sync cache for an account/contact roster")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(long, env = "ROSTER_SYNC_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Well-known resource anchoring the local owner
    #[arg(long, env = "ROSTER_SYNC_OWNER_URI")]
    owner_uri: Option<String>,

    /// Write-back quiescence window in milliseconds
    #[arg(long)]
    quiescence_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("roster_sync=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides; only the store directory is persisted
    if let Some(dir) = args.store_dir {
        config.store_dir = dir;
    }
    let persisted = config.clone();
    if let Some(owner_uri) = args.owner_uri {
        config.owner_uri = owner_uri;
    }
    if let Some(ms) = args.quiescence_ms {
        config.quiescence_ms = ms;
    }

    info!(
        store_dir = %config.store_dir.display(),
        owner = %config.owner_uri,
        quiescence_ms = config.quiescence_ms,
        "Starting roster-sync"
    );

    // Ensure store directory exists
    tokio::fs::create_dir_all(&config.store_dir).await?;

    // Save default config if none was given and none exists
    let config_path = config.config_path();
    if args.config.is_none() && !config_path.exists() {
        persisted.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let store = Arc::new(SledStore::at_path(config.graph_db_path()).await?);

    let lines = spawn_stdin_reader(config.event_channel_capacity.max(1))?;
    let (controller, _readiness) = Controller::new(store.clone(), config);
    let (tx, rx) = controller.channel();
    let reader = tokio::spawn(forward_events(lines, tx));

    info!("Reading roster events from stdin. Press Ctrl+C to stop.");

    let summary = controller.run(rx).await?;
    let _ = reader.await;
    store.flush().await?;

    info!(
        events = summary.events,
        flushes = summary.batcher.flushes,
        failed = summary.batcher.failed,
        "Final sync stats"
    );

    Ok(())
}

/// Read stdin lines on a plain thread.
///
/// The thread is outside the runtime, so a read still blocked at shutdown
/// never holds up process exit.
fn spawn_stdin_reader(capacity: usize) -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(capacity);
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read roster events");
                        return;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// Forward stdin lines as events until EOF or Ctrl+C.
///
/// Dropping the sender on return closes the controller's event stream.
async fn forward_events(mut lines: mpsc::Receiver<String>, tx: mpsc::Sender<RosterEvent>) {
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = &mut shutdown => {
                info!("Shutting down...");
                return;
            }
        };

        let Some(line) = line else {
            info!("Event input closed");
            return;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RosterEvent>(line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!(error = %e, "Skipping malformed roster event"),
        }
    }
}

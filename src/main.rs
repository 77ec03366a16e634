//! PebbleKV server entry point.
//!
//! Loads the snapshot, starts the background tasks, and serves clients until
//! Ctrl+C.

use anyhow::Context;
use clap::Parser;
use pebblekv::commands::CommandHandler;
use pebblekv::config::Config;
use pebblekv::connection::{handle_connection, ConnectionStats};
use pebblekv::storage::{
    load_into, save_if_dirty, start_expiry_sweeper, AutosaveConfig, Autosaver, StorageEngine,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::parse());

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(version = pebblekv::VERSION, "Starting PebbleKV");

    let snapshot_path = config.snapshot_path();
    let storage = Arc::new(StorageEngine::new());
    let restored = load_into(&storage, &snapshot_path)
        .with_context(|| format!("failed to load snapshot {}", snapshot_path.display()))?;
    info!(path = %snapshot_path.display(), keys = restored, "Storage engine initialized");

    let _sweeper = start_expiry_sweeper(Arc::clone(&storage), config.sweep_interval());

    let autosave = AutosaveConfig {
        interval: config.autosave_interval(),
        ..AutosaveConfig::new(&snapshot_path)
    };
    let autosaver = Autosaver::start(Arc::clone(&storage), autosave);

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(address = %config.bind_address(), "Ready to accept connections");

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&storage), Arc::clone(&config), Arc::clone(&stats)) => {}
        _ = shutdown => {}
    }

    autosaver.shutdown().await;
    match save_if_dirty(&storage, &snapshot_path).await {
        Ok(Some(count)) => info!(keys = count, "Final snapshot written"),
        Ok(None) => info!("No changes since last snapshot"),
        Err(e) => warn!(error = %e, "Final snapshot failed"),
    }

    let storage_stats = storage.stats();
    info!(
        keys = storage_stats.keys,
        gets = storage_stats.get_ops,
        sets = storage_stats.set_ops,
        dels = storage_stats.del_ops,
        expired = storage_stats.expired,
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    storage: Arc<StorageEngine>,
    config: Arc<Config>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = CommandHandler::new(Arc::clone(&storage), Arc::clone(&config));
                let stats = Arc::clone(&stats);

                tokio::spawn(handle_connection(stream, addr, handler, stats));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

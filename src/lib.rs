//! # PebbleKV - A Small In-Memory Key-Value Server
//!
//! PebbleKV speaks a subset of the Redis wire protocol (RESP), keeps every key
//! in memory, and periodically writes a snapshot to disk so the data survives
//! restarts.
//!
//! ## Features
//!
//! - **Redis-Compatible**: `redis-cli` and plain `nc` both work
//! - **TTL Support**: `SET ... PX` with lazy and background expiry
//! - **Snapshots**: Dirty stores are saved every few seconds, atomically
//! - **Async I/O**: One Tokio task per client
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              PebbleKV                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐    ┌──────────────────────────┐     │
//! │                     │ RESP Parser │    │      StorageEngine       │     │
//! │                     └─────────────┘    │  Mutex{HashMap, dirty}   │     │
//! │                                        └──────────────────────────┘     │
//! │                                           ▲                  ▲          │
//! │                           ┌───────────────┴──┐   ┌───────────┴───────┐  │
//! │                           │  ExpirySweeper   │   │    Autosaver      │  │
//! │                           └──────────────────┘   └───────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use pebblekv::{CommandHandler, Config, StorageEngine};
//! use pebblekv::connection::{handle_connection, ConnectionStats};
//! use pebblekv::storage::{load_into, start_expiry_sweeper, AutosaveConfig, Autosaver};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(Config::default());
//!     let storage = Arc::new(StorageEngine::new());
//!     load_into(&storage, &config.snapshot_path())?;
//!
//!     let _sweeper = start_expiry_sweeper(Arc::clone(&storage), config.sweep_interval());
//!     let _autosaver = Autosaver::start(
//!         Arc::clone(&storage),
//!         AutosaveConfig::new(config.snapshot_path()),
//!     );
//!
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind(config.bind_address()).await?;
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         let handler = CommandHandler::new(Arc::clone(&storage), Arc::clone(&config));
//!         tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `ECHO message`
//! - `SET key value [PX milliseconds]`
//! - `GET key`
//! - `DEL key`
//! - `CONFIG GET parameter` (`dir`, `dbfilename`)
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP request decoder and reply encoder
//! - [`storage`]: Key-value store, expiry sweeper, snapshot persistence
//! - [`commands`]: Command table and dispatcher
//! - [`connection`]: Client connection management
//! - [`config`]: Command-line configuration
//!
//! ## Expiry
//!
//! Keys with a TTL are expired in two ways:
//! 1. **Lazy**: a read of an expired key removes it and reports it missing
//! 2. **Active**: a background task periodically removes expired keys
//!
//! Neither marks the store dirty; the next snapshot simply omits them.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ParseError, Reply, Request, RespParser};
pub use storage::{start_expiry_sweeper, Autosaver, ExpirySweeper, StorageEngine};

/// The default port PebbleKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host PebbleKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of PebbleKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

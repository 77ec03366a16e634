//! Client Connections
//!
//! The accept loop in `main.rs` spawns one Tokio task per socket and hands it
//! to [`handle_connection`]. The task owns its read buffer and reply buffer;
//! the only state it shares with other clients is the store behind the
//! [`CommandHandler`](crate::commands::CommandHandler) and the
//! [`ConnectionStats`] counters.
//!
//! ```text
//!   accept() ──spawn──> ConnectionHandler::run
//!                          │
//!                          ├─ read_buf ──> BytesMut
//!                          ├─ RespParser::parse (repeat while complete)
//!                          ├─ CommandHandler::execute ──> Reply::encode_into
//!                          └─ flush all replies, read again
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use pebblekv::connection::{handle_connection, ConnectionStats};
//! use pebblekv::commands::CommandHandler;
//! use pebblekv::config::Config;
//! use pebblekv::storage::StorageEngine;
//! use std::sync::Arc;
//!
//! let storage = Arc::new(StorageEngine::new());
//! let stats = Arc::new(ConnectionStats::new());
//! let handler = CommandHandler::new(storage, Arc::new(Config::default()));
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler, stats));
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};

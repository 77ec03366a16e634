//! Storage Module
//!
//! The key-value store and the two background tasks that share it.
//!
//! ## Architecture
//!
//! ```text
//!        connections (one task each)
//!                  │ get / set / delete
//!                  ▼
//! ┌─────────────────────────────────────┐
//! │           StorageEngine             │
//! │   Mutex { HashMap, dirty flag }     │
//! └─────────────────────────────────────┘
//!          ▲                   ▲
//!          │ cleanup_expired   │ dirty_snapshot
//! ┌────────┴────────┐  ┌───────┴─────────┐
//! │  ExpirySweeper  │  │    Autosaver    │──> <dir>/<dbfilename>
//! │  (Tokio task)   │  │  (Tokio task)   │
//! └─────────────────┘  └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use pebblekv::storage::StorageEngine;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::new();
//!
//! engine.set(Bytes::from("name"), Bytes::from("pebble"));
//! assert_eq!(engine.get(&Bytes::from("name")), Some(Bytes::from("pebble")));
//!
//! engine.set_with_ttl(
//!     Bytes::from("session"),
//!     Bytes::from("token123"),
//!     Duration::from_secs(3600),
//! );
//! assert!(engine.delete(&Bytes::from("session")));
//! ```

pub mod engine;
pub mod expiry;
pub mod persistence;

pub use engine::{Entry, StorageEngine, StorageStats};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, DEFAULT_SWEEP_INTERVAL};
pub use persistence::{
    load_into, load_snapshot, save_if_dirty, save_snapshot, AutosaveConfig, Autosaver,
    PersistenceError, DEFAULT_AUTOSAVE_INTERVAL,
};

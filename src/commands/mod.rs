//! Command Layer
//!
//! Sits between the codec and the store: a decoded [`Request`] goes in, a
//! [`Reply`] comes out. Commands are rows in [`COMMAND_TABLE`], each with a
//! name, an arity and a handler function, so adding one means adding a row.
//!
//! ```text
//! Request ──> lookup(name) ──> Arity::accepts(n) ──> handler(args) ──> Reply
//!                  │                  │                    │
//!                  ▼                  ▼                    ▼
//!          ERR unknown command   ERR wrong number    StorageEngine / Config
//! ```
//!
//! [`Request`]: crate::protocol::Request
//! [`Reply`]: crate::protocol::Reply

pub mod handler;

pub use handler::{lookup, Arity, CommandError, CommandHandler, CommandSpec, COMMAND_TABLE};

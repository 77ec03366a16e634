//! Command Dispatcher
//!
//! Takes decoded requests, validates them against the command table, runs
//! them against the storage engine and produces the reply.
//!
//! ## Supported Commands
//!
//! - `PING` - Test connection
//! - `ECHO message` - Echo message
//! - `SET key value [PX milliseconds]` - Set a key, optionally with a TTL
//! - `GET key` - Get a key's value
//! - `DEL key` - Delete a key
//! - `CONFIG GET parameter` - Read a server parameter
//!
//! Inline requests (typed by hand into `nc`) only understand `PING`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │   lookup    │───>│ check arity │───>│   handler   │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │     COMMAND_TABLE                             │             │
//! │                                               ▼             │
//! │                                      StorageEngine          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::config::Config;
use crate::protocol::{Reply, Request};
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors a command can fail with. The display text is the error reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR unknown command")]
    UnknownCommand,

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Reply::error(err.to_string())
    }
}

pub type CommandResult = Result<Reply, CommandError>;

type HandlerFn = fn(&CommandHandler, &[Bytes]) -> CommandResult;

/// Number of arguments a command accepts, not counting its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Exact(expected) => n == expected,
            Arity::AtLeast(min) => n >= min,
        }
    }
}

/// One row of the command table.
#[derive(Clone, Copy)]
pub struct CommandSpec {
    /// Lowercase command name
    pub name: &'static str,
    pub arity: Arity,
    handler: HandlerFn,
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Every command the server understands.
pub static COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec {
        name: "ping",
        arity: Arity::Exact(0),
        handler: CommandHandler::cmd_ping,
    },
    CommandSpec {
        name: "echo",
        arity: Arity::Exact(1),
        handler: CommandHandler::cmd_echo,
    },
    CommandSpec {
        name: "set",
        arity: Arity::AtLeast(2),
        handler: CommandHandler::cmd_set,
    },
    CommandSpec {
        name: "get",
        arity: Arity::Exact(1),
        handler: CommandHandler::cmd_get,
    },
    CommandSpec {
        name: "del",
        arity: Arity::Exact(1),
        handler: CommandHandler::cmd_del,
    },
    CommandSpec {
        name: "config",
        arity: Arity::AtLeast(1),
        handler: CommandHandler::cmd_config,
    },
];

/// Finds a command by name, ignoring ASCII case.
pub fn lookup(name: &[u8]) -> Option<&'static CommandSpec> {
    COMMAND_TABLE
        .iter()
        .find(|spec| spec.name.as_bytes().eq_ignore_ascii_case(name))
}

/// Executes requests against a shared storage engine.
///
/// Cheap to clone; every connection gets its own copy.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    config: Arc<Config>,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>, config: Arc<Config>) -> Self {
        Self { storage, config }
    }

    /// Executes a request and returns the reply.
    ///
    /// Never panics on bad input: every failure becomes an error reply.
    pub fn execute(&self, request: &Request) -> Reply {
        let result = match request {
            Request::Inline(args) => self.execute_inline(args),
            Request::Framed(args) => self.dispatch(args),
        };
        result.unwrap_or_else(Reply::from)
    }

    /// A bare `PING` is the only inline request with a meaning.
    fn execute_inline(&self, args: &[Bytes]) -> CommandResult {
        match args {
            [name] if name.eq_ignore_ascii_case(b"ping") => Ok(Reply::pong()),
            _ => Err(CommandError::UnknownCommand),
        }
    }

    fn dispatch(&self, args: &[Bytes]) -> CommandResult {
        let (name, rest) = args.split_first().ok_or(CommandError::UnknownCommand)?;
        let spec = lookup(name).ok_or(CommandError::UnknownCommand)?;

        if !spec.arity.accepts(rest.len()) {
            return Err(CommandError::WrongArity(spec.name));
        }

        (spec.handler)(self, rest)
    }

    /// PING
    fn cmd_ping(&self, _args: &[Bytes]) -> CommandResult {
        Ok(Reply::pong())
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[Bytes]) -> CommandResult {
        Ok(Reply::bulk(args[0].clone()))
    }

    /// SET key value [PX milliseconds]
    fn cmd_set(&self, args: &[Bytes]) -> CommandResult {
        let key = args[0].clone();
        let value = args[1].clone();

        // All validation happens before the store is touched
        let ttl = match &args[2..] {
            [] => None,
            [option, millis] if option.eq_ignore_ascii_case(b"px") => Some(parse_millis(millis)?),
            _ => return Err(CommandError::Syntax),
        };

        match ttl {
            Some(ttl) => self.storage.set_with_ttl(key, value, ttl),
            None => self.storage.set(key, value),
        };

        Ok(Reply::ok())
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> CommandResult {
        Ok(match self.storage.get(&args[0]) {
            Some(value) => Reply::bulk(value),
            None => Reply::null(),
        })
    }

    /// DEL key
    fn cmd_del(&self, args: &[Bytes]) -> CommandResult {
        let removed = self.storage.delete(&args[0]);
        Ok(Reply::integer(removed as i64))
    }

    /// CONFIG GET parameter
    fn cmd_config(&self, args: &[Bytes]) -> CommandResult {
        if !args[0].eq_ignore_ascii_case(b"get") {
            return Err(CommandError::UnknownCommand);
        }
        if args.len() != 2 {
            return Err(CommandError::WrongArity("config|get"));
        }

        Ok(match self.config.parameter(&args[1]) {
            Some((name, value)) => Reply::bulk_array([Bytes::from_static(name.as_bytes()), value]),
            None => Reply::Array(vec![]),
        })
    }
}

/// Parses a non-negative millisecond count that yields a representable deadline.
fn parse_millis(raw: &[u8]) -> Result<Duration, CommandError> {
    let millis: u64 = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotAnInteger)?;

    let ttl = Duration::from_millis(millis);
    Instant::now()
        .checked_add(ttl)
        .map(|_| ttl)
        .ok_or(CommandError::NotAnInteger)
}

//! Server Configuration
//!
//! Parsed once from the command line at startup and read-only afterwards.
//! A few parameters are also visible to clients through `CONFIG GET`.

use bytes::Bytes;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// Default snapshot directory
pub const DEFAULT_DIR: &str = ".";

/// Default snapshot file name
pub const DEFAULT_DBFILENAME: &str = "dump.pkv.json";

/// Parameters answered by `CONFIG GET`.
pub const CONFIG_PARAMETERS: &[&str] = &["dir", "dbfilename"];

/// Server configuration.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pebblekv",
    version,
    about = "A small in-memory Key-Value store with TTLs and snapshot persistence"
)]
pub struct Config {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding the snapshot file
    #[arg(long, default_value = DEFAULT_DIR)]
    pub dir: PathBuf,

    /// Snapshot file name inside --dir
    #[arg(long, default_value = DEFAULT_DBFILENAME)]
    pub dbfilename: String,

    /// Milliseconds between background sweeps for expired keys
    #[arg(long, default_value_t = 10_000, value_parser = clap::value_parser!(u64).range(1..))]
    pub sweep_interval_ms: u64,

    /// Seconds between autosave checks
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub autosave_interval_secs: u64,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            dir: PathBuf::from(DEFAULT_DIR),
            dbfilename: DEFAULT_DBFILENAME.to_string(),
            sweep_interval_ms: 10_000,
            autosave_interval_secs: 5,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full path of the snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.dbfilename)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }

    /// Looks up a client-visible parameter. Names are case-insensitive.
    ///
    /// Returns the canonical (lowercase) name with its value, or `None` if the
    /// parameter is not exposed.
    pub fn parameter(&self, name: &[u8]) -> Option<(&'static str, Bytes)> {
        let canonical = CONFIG_PARAMETERS
            .iter()
            .find(|param| param.as_bytes().eq_ignore_ascii_case(name))?;

        let value = match *canonical {
            "dir" => Bytes::from(self.dir.to_string_lossy().into_owned()),
            "dbfilename" => Bytes::from(self.dbfilename.clone()),
            _ => return None,
        };
        Some((canonical, value))
    }
}

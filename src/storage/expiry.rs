//! Background Expiry Sweeper
//!
//! Lazy expiry (checking on access) only reclaims keys that somebody reads.
//! A key written once with a TTL and never touched again would otherwise sit in
//! memory forever. The sweeper fixes that by periodically removing every entry
//! whose deadline has passed.
//!
//! ## Design
//!
//! The sweeper runs as a Tokio task and:
//! 1. Sleeps for a fixed interval
//! 2. Removes all expired keys under the store lock
//! 3. Logs how many keys it removed
//!
//! It is best-effort: an expired key is gone at the latest one interval (plus
//! scan time) after its deadline. Reads never see it in the meantime because
//! of lazy expiry.

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval between sweeps (default: 10s)
    pub interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use pebblekv::storage::{StorageEngine, ExpirySweeper, ExpiryConfig};
    /// use std::sync::Arc;
    ///
    /// let engine = Arc::new(StorageEngine::new());
    /// let sweeper = ExpirySweeper::start(engine, ExpiryConfig::default());
    ///
    /// // Dropping the sweeper will stop it
    /// drop(sweeper);
    /// ```
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            interval_ms = config.interval.as_millis() as u64,
            "Background expiry sweeper started"
        );
        tokio::spawn(sweeper_loop(engine, config, shutdown_rx));

        Self { shutdown_tx }
    }

    /// Stops the expiry sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if !*self.shutdown_tx.borrow() {
            let _ = self.shutdown_tx.send(true);
            debug!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    trace!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let expired = engine.cleanup_expired();

        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = engine.len(),
                "Expired keys cleaned up"
            );
        } else {
            trace!("Sweep found no expired keys");
        }
    }
}

/// Starts the expiry sweeper with the given interval.
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>, interval: Duration) -> ExpirySweeper {
    ExpirySweeper::start(engine, ExpiryConfig { interval })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_sweeper_cleans_expired_keys() {
        let engine = Arc::new(StorageEngine::new());

        for i in 0..10 {
            engine.set_with_ttl(
                Bytes::from(format!("key{}", i)),
                Bytes::from("value"),
                Duration::from_millis(50),
            );
        }
        engine.set(Bytes::from("persistent"), Bytes::from("value"));
        assert_eq!(engine.len(), 11);

        let _sweeper = start_expiry_sweeper(Arc::clone(&engine), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(200)).await;

        // Nobody read the TTL'd keys, the sweeper still removed them
        assert_eq!(engine.len(), 1);
        assert!(engine.exists(&Bytes::from("persistent")));
        assert_eq!(engine.stats().expired, 10);
    }

    #[tokio::test]
    async fn test_sweeper_leaves_live_keys() {
        let engine = Arc::new(StorageEngine::new());
        engine.set_with_ttl(
            Bytes::from("later"),
            Bytes::from("value"),
            Duration::from_secs(60),
        );

        let _sweeper = start_expiry_sweeper(Arc::clone(&engine), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(engine.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let engine = Arc::new(StorageEngine::new());

        {
            let _sweeper = start_expiry_sweeper(Arc::clone(&engine), Duration::from_millis(10));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        engine.set_with_ttl(
            Bytes::from("key"),
            Bytes::from("value"),
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;

        // Still physically present: only lazy expiry can remove it now
        assert_eq!(engine.len(), 1);
        assert!(engine.get(&Bytes::from("key")).is_none());
        assert_eq!(engine.len(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_does_not_mark_dirty() {
        let engine = Arc::new(StorageEngine::new());
        engine.set_with_ttl(Bytes::from("k"), Bytes::from("v"), Duration::from_millis(10));
        engine.dirty_snapshot();

        let _sweeper = start_expiry_sweeper(Arc::clone(&engine), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(engine.is_empty());
        assert!(!engine.is_dirty());
    }
}

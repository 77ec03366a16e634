//! Snapshot Persistence
//!
//! The store is saved as a single JSON document holding every live entry.
//! Keys and values are hex-encoded so arbitrary bytes survive the trip, and
//! deadlines are stored as wall-clock unix milliseconds because `Instant`
//! means nothing to the next process.
//!
//! ## Write Path
//!
//! ```text
//!   lock ─> copy live entries ─> clear dirty ─> unlock
//!                                                 │
//!                  (blocking thread, no lock held)▼
//!   write <path>.tmp ─> fsync ─> rename over <path>
//! ```
//!
//! The rename is the commit point. A crash before it leaves the previous
//! snapshot untouched, a crash after it leaves the new one. If any step fails
//! the store is marked dirty again so the next autosave tick retries.
//!
//! ## Read Path
//!
//! At startup the snapshot is loaded if it exists. A missing file is a normal
//! first run. Entries whose deadline has already passed are dropped.

use crate::storage::{Entry, StorageEngine};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Version written into every snapshot document.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Default interval between autosave checks.
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(5);

/// Errors raised while reading or writing a snapshot.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed snapshot entry: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("unsupported snapshot version {0} (expected {expected})", expected = SNAPSHOT_VERSION)]
    UnsupportedVersion(u32),

    #[error("snapshot task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    entries: Vec<SnapshotRecord>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct SnapshotRecord {
    key: String,
    value: String,
    /// Milliseconds since the Unix epoch at which this entry expires.
    expires_at_ms: Option<u64>,
}

fn unix_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn to_record(key: &Bytes, entry: &Entry, now: Instant, wall_now: SystemTime) -> SnapshotRecord {
    let expires_at_ms = entry
        .expires_at
        .and_then(|exp| wall_now.checked_add(exp.saturating_duration_since(now)))
        .map(unix_ms);

    SnapshotRecord {
        key: hex::encode(key),
        value: hex::encode(&entry.value),
        expires_at_ms,
    }
}

/// Returns `Ok(None)` for records whose deadline is not in the future.
fn from_record(
    record: SnapshotRecord,
    now: Instant,
    wall_now: SystemTime,
) -> Result<Option<(Bytes, Entry)>, PersistenceError> {
    let expires_at = match record.expires_at_ms {
        None => None,
        Some(ms) => {
            let deadline = UNIX_EPOCH + Duration::from_millis(ms);
            match deadline.duration_since(wall_now) {
                Ok(remaining) if !remaining.is_zero() => now.checked_add(remaining),
                _ => return Ok(None),
            }
        }
    };

    let key = Bytes::from(hex::decode(record.key)?);
    let value = Bytes::from(hex::decode(record.value)?);
    Ok(Some((key, Entry { value, expires_at })))
}

/// `<path>.tmp`, next to the canonical file so the rename stays on one filesystem.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Atomically writes `entries` to `path`.
///
/// This does blocking file I/O. From async code, go through [`save_if_dirty`].
pub fn save_snapshot(path: &Path, entries: &[(Bytes, Entry)]) -> Result<(), PersistenceError> {
    let now = Instant::now();
    let wall_now = SystemTime::now();
    let document = SnapshotFile {
        version: SNAPSHOT_VERSION,
        entries: entries
            .iter()
            .map(|(key, entry)| to_record(key, entry, now, wall_now))
            .collect(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    let result = write_and_rename(&tmp, path, &document);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_and_rename(tmp: &Path, path: &Path, document: &SnapshotFile) -> Result<(), PersistenceError> {
    let mut writer = BufWriter::new(File::create(tmp)?);
    serde_json::to_writer(&mut writer, document)?;
    writer.flush()?;

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);

    fs::rename(tmp, path)?;
    Ok(())
}

/// Reads the snapshot at `path`.
///
/// Returns `Ok(None)` if the file does not exist. Entries that expired while
/// the process was down are left out.
pub fn load_snapshot(path: &Path) -> Result<Option<Vec<(Bytes, Entry)>>, PersistenceError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let document: SnapshotFile = serde_json::from_reader(BufReader::new(file))?;
    if document.version != SNAPSHOT_VERSION {
        return Err(PersistenceError::UnsupportedVersion(document.version));
    }

    let now = Instant::now();
    let wall_now = SystemTime::now();
    let mut entries = Vec::with_capacity(document.entries.len());
    for record in document.entries {
        if let Some(entry) = from_record(record, now, wall_now)? {
            entries.push(entry);
        }
    }
    Ok(Some(entries))
}

/// Hydrates `engine` from the snapshot at `path`.
///
/// Returns the number of entries loaded (zero when there is no snapshot).
/// The store is left clean: nothing loaded needs saving again.
pub fn load_into(engine: &StorageEngine, path: &Path) -> Result<usize, PersistenceError> {
    match load_snapshot(path)? {
        Some(entries) => {
            let loaded = engine.restore(entries);
            info!(path = %path.display(), keys = loaded, "Snapshot loaded");
            Ok(loaded)
        }
        None => {
            info!(path = %path.display(), "No snapshot found, starting empty");
            Ok(0)
        }
    }
}

/// Saves a snapshot if the store has unsaved changes.
///
/// The copy is taken under the store lock; the file is written afterwards on a
/// blocking thread. On failure the store is marked dirty again.
///
/// Returns the number of entries written, or `None` if the store was clean.
pub async fn save_if_dirty(
    engine: &StorageEngine,
    path: &Path,
) -> Result<Option<usize>, PersistenceError> {
    let Some(entries) = engine.dirty_snapshot() else {
        return Ok(None);
    };

    let count = entries.len();
    let target = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || save_snapshot(&target, &entries))
        .await
        .map_err(PersistenceError::from)
        .and_then(|inner| inner);

    match result {
        Ok(()) => Ok(Some(count)),
        Err(e) => {
            engine.mark_dirty();
            Err(e)
        }
    }
}

/// Configuration for the autosave task.
#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    /// Canonical snapshot path
    pub path: PathBuf,
    /// Interval between dirty checks (default: 5s)
    pub interval: Duration,
}

impl AutosaveConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            interval: DEFAULT_AUTOSAVE_INTERVAL,
        }
    }
}

/// A handle to the running autosave task.
///
/// When this handle is dropped, the task will be stopped. A save already in
/// progress still runs to completion on its blocking thread.
#[derive(Debug)]
pub struct Autosaver {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Autosaver {
    /// Starts the autosave task. Must be called from within a Tokio runtime.
    pub fn start(engine: Arc<StorageEngine>, config: AutosaveConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            path = %config.path.display(),
            interval_ms = config.interval.as_millis() as u64,
            "Autosave started"
        );
        let task = tokio::spawn(autosave_loop(engine, config, shutdown_rx));

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Stops the task and waits for a save in progress to finish.
    ///
    /// Call this before a final save so the two never write concurrently.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Autosave task failed");
            }
        }
    }

    /// Stops the autosave task.
    pub fn stop(&self) {
        if !*self.shutdown_tx.borrow() {
            let _ = self.shutdown_tx.send(true);
            debug!("Autosave stopped");
        }
    }
}

impl Drop for Autosaver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn autosave_loop(
    engine: Arc<StorageEngine>,
    config: AutosaveConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    trace!("Autosave received shutdown signal");
                    return;
                }
            }
        }

        match save_if_dirty(&engine, &config.path).await {
            Ok(Some(keys)) => debug!(path = %config.path.display(), keys, "Snapshot saved"),
            Ok(None) => trace!("Store clean, skipping snapshot"),
            Err(e) => error!(
                path = %config.path.display(),
                error = %e,
                "Snapshot failed, previous snapshot kept"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn entries(pairs: &[(&str, &str)]) -> Vec<(Bytes, Entry)> {
        pairs
            .iter()
            .map(|(k, v)| (Bytes::from(k.to_string()), Entry::new(Bytes::from(v.to_string()))))
            .collect()
    }

    #[test]
    fn record_without_expiry_roundtrips() {
        let now = Instant::now();
        let wall = SystemTime::now();
        let entry = Entry::new(Bytes::from_static(b"\x00bin\r\n"));

        let record = to_record(&Bytes::from("k"), &entry, now, wall);
        assert_eq!(record.key, "6b");
        assert!(record.expires_at_ms.is_none());

        let (key, restored) = from_record(record, now, wall).unwrap().unwrap();
        assert_eq!(key, Bytes::from("k"));
        assert_eq!(restored, entry);
    }

    #[test]
    fn record_with_future_ttl_keeps_remaining_time() {
        let now = Instant::now();
        let wall = SystemTime::now();
        let entry = Entry {
            value: Bytes::from("v"),
            expires_at: Some(now + Duration::from_secs(3600)),
        };

        let record = to_record(&Bytes::from("k"), &entry, now, wall);
        let (_, restored) = from_record(record, now, wall).unwrap().unwrap();

        let remaining = restored.expires_at.unwrap() - now;
        assert!(remaining > Duration::from_secs(3599), "got {:?}", remaining);
        assert!(remaining <= Duration::from_secs(3600));
    }

    #[test]
    fn record_already_expired_is_dropped() {
        let wall = SystemTime::now();
        let record = SnapshotRecord {
            key: hex::encode("k"),
            value: hex::encode("v"),
            expires_at_ms: Some(unix_ms(wall) - 1000),
        };
        assert!(from_record(record, Instant::now(), wall).unwrap().is_none());
    }

    #[test]
    fn record_with_bad_hex_is_an_error() {
        let record = SnapshotRecord {
            key: "zz".to_string(),
            value: String::new(),
            expires_at_ms: None,
        };
        assert!(matches!(
            from_record(record, Instant::now(), SystemTime::now()),
            Err(PersistenceError::Hex(_))
        ));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");

        let mut data = entries(&[("foo", "bar"), ("hello", "world")]);
        data.push((
            Bytes::from("session"),
            Entry::with_ttl(Bytes::from("token"), Duration::from_secs(600)),
        ));

        save_snapshot(&path, &data).unwrap();
        assert!(!temp_path(&path).exists());

        let mut loaded = load_snapshot(&path).unwrap().unwrap();
        loaded.sort_by(|a, b| a.0.cmp(&b.0));

        let keys: Vec<_> = loaded.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(
            keys,
            vec![Bytes::from("foo"), Bytes::from("hello"), Bytes::from("session")]
        );
        assert_eq!(loaded[0].1.value, Bytes::from("bar"));
        assert!(loaded[2].1.expires_at.is_some());
    }

    #[test]
    fn load_drops_entries_that_expired_while_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");

        let mut data = entries(&[("live", "1")]);
        data.push((
            Bytes::from("short"),
            Entry::with_ttl(Bytes::from("2"), Duration::from_millis(30)),
        ));
        save_snapshot(&path, &data).unwrap();

        thread::sleep(Duration::from_millis(60));

        let engine = StorageEngine::new();
        assert_eq!(load_into(&engine, &path).unwrap(), 1);
        assert_eq!(engine.get(&Bytes::from("live")), Some(Bytes::from("1")));
        assert_eq!(engine.get(&Bytes::from("short")), None);
        assert!(!engine.is_dirty());
    }

    #[test]
    fn missing_snapshot_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-written.json");

        assert!(load_snapshot(&path).unwrap().is_none());

        let engine = StorageEngine::new();
        assert_eq!(load_into(&engine, &path).unwrap(), 0);
        assert!(engine.is_empty());
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        fs::write(&path, b"{not json").unwrap();

        assert!(matches!(load_snapshot(&path), Err(PersistenceError::Json(_))));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        fs::write(&path, br#"{"version":99,"entries":[]}"#).unwrap();

        assert!(matches!(
            load_snapshot(&path),
            Err(PersistenceError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn save_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("dump.json");

        save_snapshot(&path, &entries(&[("a", "1")])).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn failed_save_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        save_snapshot(&path, &entries(&[("old", "1")])).unwrap();

        // A directory squatting on the temp path makes the write fail
        fs::create_dir(temp_path(&path)).unwrap();
        assert!(save_snapshot(&path, &entries(&[("new", "2")])).is_err());

        let loaded = load_snapshot(&path).unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, Bytes::from("old"));
    }

    #[tokio::test]
    async fn save_if_dirty_clears_and_rearms_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        let engine = StorageEngine::new();

        assert_eq!(save_if_dirty(&engine, &path).await.unwrap(), None);
        assert!(!path.exists());

        engine.set(Bytes::from("a"), Bytes::from("1"));
        assert_eq!(save_if_dirty(&engine, &path).await.unwrap(), Some(1));
        assert!(!engine.is_dirty());
        assert!(path.exists());

        fs::create_dir(temp_path(&path)).unwrap();
        engine.set(Bytes::from("b"), Bytes::from("2"));
        assert!(save_if_dirty(&engine, &path).await.is_err());
        assert!(engine.is_dirty());
    }

    #[tokio::test]
    async fn autosaver_writes_dirty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        let engine = Arc::new(StorageEngine::new());

        let config = AutosaveConfig {
            path: path.clone(),
            interval: Duration::from_millis(20),
        };
        let _autosaver = Autosaver::start(Arc::clone(&engine), config);

        engine.set(Bytes::from("foo"), Bytes::from("bar"));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!engine.is_dirty());
        let fresh = StorageEngine::new();
        assert_eq!(load_into(&fresh, &path).unwrap(), 1);
        assert_eq!(fresh.get(&Bytes::from("foo")), Some(Bytes::from("bar")));
    }

    #[tokio::test]
    async fn autosaver_skips_clean_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        let engine = Arc::new(StorageEngine::new());

        let config = AutosaveConfig {
            path: path.clone(),
            interval: Duration::from_millis(10),
        };
        let _autosaver = Autosaver::start(engine, config);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn autosaver_shutdown_stops_saving() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        let engine = Arc::new(StorageEngine::new());

        let config = AutosaveConfig {
            path: path.clone(),
            interval: Duration::from_millis(10),
        };
        let autosaver = Autosaver::start(Arc::clone(&engine), config);
        autosaver.shutdown().await;

        engine.set(Bytes::from("late"), Bytes::from("write"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!path.exists());
        assert!(engine.is_dirty());
    }
}

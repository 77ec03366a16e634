//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the key-value store at the heart of PebbleKV.
//!
//! ## Design Decisions
//!
//! 1. **One Lock**: The whole map and the dirty flag sit behind a single `Mutex`.
//!    Compound operations (check-then-delete, collect-then-snapshot) happen in one
//!    critical section, so a reader, the sweeper and the autosaver can never see
//!    each other's half-finished work.
//! 2. **Lazy Expiry**: `get` checks the deadline and drops an expired entry while it
//!    still holds the lock it used for the lookup.
//! 3. **Active Expiry**: the background sweeper calls `cleanup_expired`.
//! 4. **Dirty Tracking**: writes and successful deletes set the flag, the
//!    autosaver clears it when it takes a copy.
//!
//! The lock is never held across I/O. Callers get owned `Bytes` back (a cheap
//! reference-count bump) and do their network or disk work after it is released.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates a new entry that expires `ttl` from now.
    ///
    /// A deadline too far away to represent never arrives.
    pub fn with_ttl(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    /// An entry is expired once its deadline has been reached.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Returns the remaining TTL, or None if the entry never expires.
    pub fn ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|exp| exp.saturating_duration_since(Instant::now()))
    }
}

/// Everything guarded by the store lock.
#[derive(Debug, Default)]
struct Inner {
    data: HashMap<Bytes, Entry>,
    dirty: bool,
}

/// The key-value store shared by every connection and background task.
///
/// # Thread Safety
///
/// Wrap it in an `Arc` and hand clones to whoever needs it. All operations
/// take `&self`.
///
/// # Example
///
/// ```
/// use pebblekv::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("foo"), Bytes::from("bar"));
/// assert_eq!(engine.get(&Bytes::from("foo")), Some(Bytes::from("bar")));
///
/// engine.set_with_ttl(Bytes::from("session"), Bytes::from("abc123"), Duration::from_secs(60));
/// assert!(engine.is_dirty());
/// ```
pub struct StorageEngine {
    inner: Mutex<Inner>,

    /// Statistics: total GET operations
    get_count: AtomicU64,

    /// Statistics: total SET operations
    set_count: AtomicU64,

    /// Statistics: total DEL operations
    del_count: AtomicU64,

    /// Statistics: number of expired keys removed, lazily or by the sweeper
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("keys", &self.len())
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty, clean storage engine.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Acquires the store lock.
    ///
    /// A panic while holding the lock cannot leave the map half-updated (every
    /// critical section is a single map call or a read-only scan), so a poisoned
    /// lock is recovered rather than propagated.
    #[inline]
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets a key-value pair without expiry, replacing any previous entry.
    ///
    /// # Returns
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was replaced.
    pub fn set(&self, key: Bytes, value: Bytes) -> bool {
        self.insert(key, Entry::new(value))
    }

    /// Sets a key-value pair that expires after `ttl`, replacing any previous entry.
    pub fn set_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) -> bool {
        self.insert(key, Entry::with_ttl(value, ttl))
    }

    fn insert(&self, key: Bytes, entry: Entry) -> bool {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        inner.dirty = true;
        inner.data.insert(key, entry).is_none()
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. An expired entry
    /// is removed in the same critical section as the lookup.
    pub fn get(&self, key: &Bytes) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        let entry = inner.data.get(key)?;
        if !entry.is_expired() {
            return Some(entry.value.clone());
        }

        inner.data.remove(key);
        self.expired_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Gets the full entry for a key, with the same lazy expiry as `get`.
    pub fn get_entry(&self, key: &Bytes) -> Option<Entry> {
        let mut inner = self.lock();
        let entry = inner.data.get(key)?;
        if !entry.is_expired() {
            return Some(entry.clone());
        }

        inner.data.remove(key);
        self.expired_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Deletes a key.
    ///
    /// An entry that has already expired counts as absent: it is dropped but the
    /// call reports `false` and the store is not marked dirty.
    ///
    /// # Returns
    ///
    /// Returns `true` if a live key was deleted, `false` if it didn't exist.
    pub fn delete(&self, key: &Bytes) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        match inner.data.remove(key) {
            Some(entry) if entry.is_expired() => {
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                false
            }
            Some(_) => {
                inner.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Checks if a key exists and has not expired.
    pub fn exists(&self, key: &Bytes) -> bool {
        self.get_entry(key).is_some()
    }

    /// Removes every entry whose deadline is strictly in the past.
    ///
    /// This is called by the background expiry sweeper.
    ///
    /// # Returns
    ///
    /// Returns the number of keys that were removed.
    pub fn cleanup_expired(&self) -> u64 {
        let now = Instant::now();
        let mut inner = self.lock();
        let before = inner.data.len();

        inner
            .data
            .retain(|_, entry| entry.expires_at.map_or(true, |exp| exp >= now));

        let removed = (before - inner.data.len()) as u64;
        drop(inner);

        if removed > 0 {
            self.expired_count.fetch_add(removed, Ordering::Relaxed);
        }
        removed
    }

    /// Takes a point-in-time copy of all live entries if there are unsaved changes.
    ///
    /// The dirty flag is cleared in the same critical section as the copy.
    /// Returns `None` when there is nothing new to save.
    pub fn dirty_snapshot(&self) -> Option<Vec<(Bytes, Entry)>> {
        let now = Instant::now();
        let mut inner = self.lock();
        if !inner.dirty {
            return None;
        }

        let copy = collect_live(&inner.data, now);
        inner.dirty = false;
        Some(copy)
    }

    /// Takes a point-in-time copy of all live entries, dirty or not.
    pub fn snapshot(&self) -> Vec<(Bytes, Entry)> {
        let now = Instant::now();
        collect_live(&self.lock().data, now)
    }

    /// Flags the store as having unsaved changes.
    ///
    /// Used by the autosaver to re-arm itself after a failed write.
    pub fn mark_dirty(&self) {
        self.lock().dirty = true;
    }

    /// Returns true if there are changes not yet captured by a snapshot.
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Loads entries into the store without marking it dirty.
    ///
    /// Entries that are already expired are skipped. Returns the number loaded.
    pub fn restore<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (Bytes, Entry)>,
    {
        let now = Instant::now();
        let mut inner = self.lock();
        let mut loaded = 0;
        for (key, entry) in entries {
            if !entry.is_expired_at(now) {
                inner.data.insert(key, entry);
                loaded += 1;
            }
        }
        loaded
    }

    /// Returns the number of stored entries, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len() as u64,
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

fn collect_live(data: &HashMap<Bytes, Entry>, now: Instant) -> Vec<(Bytes, Entry)> {
    data.iter()
        .filter(|(_, entry)| !entry.is_expired_at(now))
        .map(|(key, entry)| (key.clone(), entry.clone()))
        .collect()
}

/// Store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Total GET operations
    pub get_ops: u64,
    /// Total SET operations
    pub set_ops: u64,
    /// Total DEL operations
    pub del_ops: u64,
    /// Total expired keys removed
    pub expired: u64,
}

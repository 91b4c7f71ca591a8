//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the core store for TeaDB: a concurrent map from
//! string keys to opaque values, where every entry may carry an absolute
//! expiry timestamp.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Keys are spread over 64 shards, each behind its own
//!    `RwLock`, so single-key operations on different keys rarely contend.
//! 2. **Atomic Check-Then-Act**: Every single-key operation does its lookup and
//!    its mutation under one write guard on the key's shard.
//! 3. **Consistent Whole-Store Views**: `count`, `snapshot` and
//!    `remove_expired` take every shard lock, always in index order, before
//!    reading anything. The result reflects one instant and two such
//!    operations can never deadlock.
//! 4. **Lazy + Active Expiry**: An expired entry is treated as absent by every
//!    operation and removed when touched; the background sweeper removes the
//!    ones nobody touches.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │            │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Locks are `parking_lot` locks: they never poison and are never held
//! across an `.await`.

use crate::storage::clock::{Clock, SystemClock};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Number of shards for the store.
const NUM_SHARDS: usize = 64;

/// Errors returned by store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A live entry already exists under this key
    #[error("key '{0}' already exists")]
    AlreadyExists(String),

    /// No live entry exists under this key
    #[error("key '{0}' not found")]
    NotFound(String),

    /// Caller supplied a malformed argument (bad TTL, empty key, ...)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Parses a TTL token as a non-negative number of seconds.
///
/// `0` is valid and means the entry never expires.
pub fn parse_ttl_seconds(text: &str) -> StoreResult<u64> {
    text.trim().parse::<u64>().map_err(|_| {
        StoreError::InvalidArgument(format!(
            "ttl must be a non-negative integer number of seconds, got '{}'",
            text
        ))
    })
}

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<DateTime<Utc>>,
    /// When this entry was created
    pub created_at: DateTime<Utc>,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Bytes, now: DateTime<Utc>) -> Self {
        Self {
            value,
            expires_at: None,
            created_at: now,
        }
    }

    /// Creates an entry that expires `ttl_seconds` after `now`.
    ///
    /// A TTL of zero produces an entry that never expires. Returns `None`
    /// when the expiry would fall outside the representable time range.
    pub fn with_ttl(value: Bytes, ttl_seconds: u64, now: DateTime<Utc>) -> Option<Self> {
        if ttl_seconds == 0 {
            return Some(Self::new(value, now));
        }

        let expires_at = i64::try_from(ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))?;

        Some(Self {
            value,
            expires_at: Some(expires_at),
            created_at: now,
        })
    }

    /// Checks if this entry has expired at `now`. The boundary is inclusive.
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

/// A single shard containing a portion of the key-value pairs.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<String, Entry>>,
}

/// The TTL key-value store.
///
/// This struct is designed to be wrapped in an `Arc` and shared by every
/// TCP session, HTTP handler, the expiry sweeper and the snapshot persister.
/// All operations are thread-safe.
///
/// # Example
///
/// ```
/// use teadb::storage::{Store, StoreError};
/// use bytes::Bytes;
///
/// let store = Store::new();
///
/// store.create("name", Bytes::from("tea"), 60).unwrap();
/// assert_eq!(store.get("name"), Ok(Bytes::from("tea")));
///
/// // Keys are unique
/// assert_eq!(
///     store.create("name", Bytes::from("coffee"), 60),
///     Err(StoreError::AlreadyExists("name".to_string()))
/// );
/// ```
pub struct Store {
    /// Sharded storage for reduced lock contention
    shards: Vec<Shard>,

    /// Where "now" comes from for every expiry decision
    clock: Arc<dyn Clock>,

    /// Bumped on every mutation of the live entry set
    generation: AtomicU64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("shards", &self.shards.len())
            .field("clock", &self.clock)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates an empty store backed by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store that reads time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            clock,
            generation: AtomicU64::new(0),
        }
    }

    /// The clock this store uses for expiry decisions.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Mutation counter; changes whenever the live entry set changes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    #[inline]
    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Determines which shard a key belongs to.
    #[inline]
    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn get_shard(&self, key: &str) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Inserts a new entry that expires `ttl_seconds` from now.
    ///
    /// Fails with `AlreadyExists` if a live entry has the same key. An expired
    /// entry that the sweeper has not yet removed does not block the insert.
    pub fn create(&self, key: &str, value: impl Into<Bytes>, ttl_seconds: u64) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidArgument("key must not be empty".to_string()));
        }

        let shard = self.get_shard(key);
        let mut data = shard.data.write();
        let now = self.clock.now();

        if let Some(existing) = data.get(key) {
            if !existing.is_expired_at(now) {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }
        }

        let entry = Entry::with_ttl(value.into(), ttl_seconds, now).ok_or_else(|| {
            StoreError::InvalidArgument(format!("ttl of {} seconds is out of range", ttl_seconds))
        })?;

        data.insert(key.to_string(), entry);
        self.bump_generation();
        Ok(())
    }

    /// Gets the value for a key.
    ///
    /// Expired keys are reported as `NotFound` and removed on the spot.
    pub fn get(&self, key: &str) -> StoreResult<Bytes> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Gets the full entry for a key (including expiry metadata).
    pub fn get_entry(&self, key: &str) -> StoreResult<Entry> {
        let shard = self.get_shard(key);

        // Fast path under the read lock
        {
            let data = shard.data.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired_at(self.clock.now()) => {
                    return Ok(entry.clone());
                }
                Some(_) => {}
                None => return Err(StoreError::NotFound(key.to_string())),
            }
        }

        // Key exists but is expired - need write lock to remove it
        let mut data = shard.data.write();
        let now = self.clock.now();
        match data.get(key) {
            Some(entry) if entry.is_expired_at(now) => {
                data.remove(key);
                Err(StoreError::NotFound(key.to_string()))
            }
            // Race: another caller replaced the entry in between
            Some(entry) => Ok(entry.clone()),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    /// Replaces the value of a live entry, keeping its expiry.
    pub fn update(&self, key: &str, value: impl Into<Bytes>) -> StoreResult<()> {
        let shard = self.get_shard(key);
        let mut data = shard.data.write();
        let now = self.clock.now();

        match data.get_mut(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                entry.value = value.into();
                self.bump_generation();
                Ok(())
            }
            Some(_) => {
                data.remove(key);
                Err(StoreError::NotFound(key.to_string()))
            }
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    /// Deletes a live entry. Deleting a missing key reports `NotFound`.
    pub fn delete(&self, key: &str) -> StoreResult<()> {
        let shard = self.get_shard(key);
        let mut data = shard.data.write();
        let now = self.clock.now();

        match data.remove(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                self.bump_generation();
                Ok(())
            }
            // An expired entry was already logically gone
            Some(_) | None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    /// Number of live (non-expired) entries.
    pub fn count(&self) -> usize {
        let guards: Vec<_> = self.shards.iter().map(|s| s.data.read()).collect();
        let now = self.clock.now();

        guards
            .iter()
            .map(|data| data.values().filter(|e| !e.is_expired_at(now)).count())
            .sum()
    }

    /// Returns a point-in-time copy of every live entry, sorted by key.
    ///
    /// All shard read locks are held while the copy is taken, so no entry is
    /// observed mid-mutation and no mutation lands halfway through the copy.
    pub fn snapshot(&self) -> Vec<(String, Entry)> {
        let guards: Vec<_> = self.shards.iter().map(|s| s.data.read()).collect();
        let now = self.clock.now();

        let mut entries: Vec<(String, Entry)> = guards
            .iter()
            .flat_map(|data| data.iter())
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        drop(guards);

        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Removes every entry whose expiry is at or before now, in one pass.
    ///
    /// All shard write locks are held for the duration, so the pass is atomic
    /// with respect to every other store operation.
    ///
    /// # Returns
    ///
    /// The keys that were removed.
    pub fn remove_expired(&self) -> Vec<String> {
        let mut guards: Vec<_> = self.shards.iter().map(|s| s.data.write()).collect();
        let now = self.clock.now();
        let mut removed = Vec::new();

        for data in guards.iter_mut() {
            data.retain(|key, entry| {
                if entry.is_expired_at(now) {
                    removed.push(key.clone());
                    false
                } else {
                    true
                }
            });
        }
        drop(guards);

        if !removed.is_empty() {
            self.bump_generation();
        }
        removed
    }

    /// Bulk-loads entries, typically from a snapshot at startup.
    ///
    /// Entries that are already expired are dropped. Existing keys are
    /// overwritten.
    ///
    /// # Returns
    ///
    /// The number of entries inserted.
    pub fn hydrate<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, Entry)>,
    {
        let now = self.clock.now();
        let mut inserted = 0;

        for (key, entry) in entries {
            if key.is_empty() || entry.is_expired_at(now) {
                continue;
            }
            self.get_shard(&key).data.write().insert(key, entry);
            inserted += 1;
        }

        if inserted > 0 {
            self.bump_generation();
        }
        inserted
    }
}

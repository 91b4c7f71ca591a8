//! Crash-Safe Snapshot Files
//!
//! A snapshot is the full set of live entries, written as a pretty-printed
//! JSON array of `{key, value, expires_at}` records:
//!
//! ```text
//! [
//!   {
//!     "key": "orange",
//!     "value": "juice",
//!     "expires_at": "2026-10-17T09:30:05.123456Z"
//!   },
//!   {
//!     "key": "config",
//!     "value": "forever",
//!     "expires_at": null
//!   }
//! ]
//! ```
//!
//! ## Crash Safety
//!
//! [`SnapshotWriter`] never writes the snapshot file in place:
//! 1. Write to a temporary file next to it (`<path>.tmp`)
//! 2. fsync the temporary file
//! 3. Atomically rename it over the snapshot path
//! 4. fsync the parent directory (unix)
//!
//! Either the previous snapshot or the new one is visible, never a mix.
//!
//! ## Loading
//!
//! [`SnapshotLoader`] is strict about structure and lenient about single
//! records: a file that is not a JSON array of records fails the load, while a
//! record with an unparsable `expires_at` is skipped with a warning.
//!
//! Files written by earlier releases, whose records are
//! `{"Key", "Value", "TTL"}` with `TTL` an RFC 3339 deadline, load as well.

use crate::storage::{Entry, Store};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while reading or writing snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot file exists but could not be read
    #[error("failed to read snapshot '{}': {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    /// The snapshot could not be written or moved into place
    #[error("failed to write snapshot '{}': {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    /// The snapshot file is not a JSON array of records
    #[error("snapshot '{}' is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// In-memory entries could not be encoded
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The blocking write task panicked or was cancelled
    #[error("snapshot task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One persisted entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub key: String,
    pub value: String,
    /// RFC 3339 UTC timestamp, `null` for entries that never expire
    pub expires_at: Option<DateTime<Utc>>,
}

impl SnapshotRecord {
    /// Builds a record from a store entry.
    ///
    /// Values are stored as text; bytes that are not valid UTF-8 are replaced.
    pub fn from_entry(key: &str, entry: &Entry) -> Self {
        Self {
            key: key.to_string(),
            value: String::from_utf8_lossy(&entry.value).into_owned(),
            expires_at: entry.expires_at,
        }
    }
}

/// The on-disk shape used while loading, so a bad `expires_at` can be
/// rejected per record instead of failing the whole file.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(alias = "Key")]
    key: String,
    #[serde(alias = "Value")]
    value: String,
    #[serde(default, alias = "TTL")]
    expires_at: serde_json::Value,
}

impl RawRecord {
    fn parse_expiry(&self) -> Option<Option<DateTime<Utc>>> {
        match &self.expires_at {
            serde_json::Value::Null => Some(None),
            serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|ts| Some(ts.with_timezone(&Utc))),
            _ => None,
        }
    }
}

/// Returns `<path>.tmp`, the staging file used for atomic replacement.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Writes snapshots with write-fsync-rename semantics.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
    temp_path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let temp_path = temp_path_for(&path);
        Self { path, temp_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes `entries` and atomically replaces the snapshot file.
    ///
    /// # Returns
    ///
    /// The number of records written.
    pub fn write(&self, entries: &[(String, Entry)]) -> Result<usize, SnapshotError> {
        let records: Vec<SnapshotRecord> = entries
            .iter()
            .map(|(key, entry)| SnapshotRecord::from_entry(key, entry))
            .collect();
        let bytes = serde_json::to_vec_pretty(&records)?;

        if let Err(source) = self.write_atomically(&bytes) {
            let _ = fs::remove_file(&self.temp_path);
            return Err(SnapshotError::Write {
                path: self.path.clone(),
                source,
            });
        }

        debug!(
            path = %self.path.display(),
            records = records.len(),
            bytes = bytes.len(),
            "Snapshot written"
        );
        Ok(records.len())
    }

    fn write_atomically(&self, bytes: &[u8]) -> io::Result<()> {
        let dir = parent_dir(&self.path);
        fs::create_dir_all(dir)?;

        // Step 1: write the temporary file
        let mut file = File::create(&self.temp_path)?;
        file.write_all(bytes)?;

        // Step 2: fsync it
        file.sync_all()?;
        drop(file);

        // Step 3: atomic rename
        fs::rename(&self.temp_path, &self.path)?;

        // Step 4: fsync parent directory
        #[cfg(unix)]
        File::open(dir)?.sync_all()?;

        Ok(())
    }
}

/// The result of reading a snapshot file.
#[derive(Debug, Default)]
pub struct LoadedSnapshot {
    /// Entries read from the file, expired ones included
    pub entries: Vec<(String, Entry)>,
    /// Records skipped because their expiry could not be parsed
    pub malformed: usize,
}

/// Reads snapshots at startup.
#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    path: PathBuf,
}

impl SnapshotLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and decodes the snapshot file.
    ///
    /// A missing or blank file yields an empty snapshot. A leftover temporary
    /// file from an interrupted write is removed.
    pub fn load(&self, now: DateTime<Utc>) -> Result<LoadedSnapshot, SnapshotError> {
        self.remove_stale_temp_file();

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No snapshot found, starting empty");
                return Ok(LoadedSnapshot::default());
            }
            Err(source) => {
                return Err(SnapshotError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            warn!(path = %self.path.display(), "Snapshot file is empty, starting empty");
            return Ok(LoadedSnapshot::default());
        }

        let raw: Vec<RawRecord> =
            serde_json::from_slice(&bytes).map_err(|source| SnapshotError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        let mut loaded = LoadedSnapshot::default();
        for record in raw {
            match record.parse_expiry() {
                Some(expires_at) => loaded.entries.push((
                    record.key,
                    Entry {
                        value: Bytes::from(record.value),
                        expires_at,
                        created_at: now,
                    },
                )),
                None => {
                    warn!(
                        key = %record.key,
                        expires_at = %record.expires_at,
                        "Dropping snapshot record with malformed expiry"
                    );
                    loaded.malformed += 1;
                }
            }
        }

        Ok(loaded)
    }

    /// Loads the snapshot into `store`, dropping entries that have already
    /// expired.
    ///
    /// # Returns
    ///
    /// The number of entries now live in the store.
    pub fn load_into(&self, store: &Store) -> Result<usize, SnapshotError> {
        let loaded = self.load(store.clock().now())?;
        let total = loaded.entries.len();
        let inserted = store.hydrate(loaded.entries);

        info!(
            path = %self.path.display(),
            loaded = inserted,
            expired = total - inserted,
            malformed = loaded.malformed,
            "Snapshot loaded"
        );
        Ok(inserted)
    }

    fn remove_stale_temp_file(&self) {
        let temp_path = temp_path_for(&self.path);
        if temp_path.exists() {
            match fs::remove_file(&temp_path) {
                Ok(()) => warn!(
                    path = %temp_path.display(),
                    "Removed temporary snapshot left by an interrupted write"
                ),
                Err(e) => warn!(
                    path = %temp_path.display(),
                    error = %e,
                    "Could not remove stale temporary snapshot"
                ),
            }
        }
    }
}

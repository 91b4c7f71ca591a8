//! Persistence Module
//!
//! Snapshots of the whole store, written periodically and read once at
//! startup.
//!
//! ```text
//!  startup                      runtime
//! ┌────────────────┐          ┌────────────────────┐
//! │ SnapshotLoader │          │ SnapshotPersister  │  every N seconds
//! └───────┬────────┘          └─────────┬──────────┘
//!         │ hydrate                     │ Store::snapshot()
//!         ▼                             ▼
//! ┌────────────────┐          ┌────────────────────┐
//! │     Store      │          │  SnapshotWriter    │  tmp + fsync + rename
//! └────────────────┘          └────────────────────┘
//! ```

pub mod persister;
pub mod snapshot;

pub use persister::{persist_now, SnapshotPersister};
pub use snapshot::{
    temp_path_for, LoadedSnapshot, SnapshotError, SnapshotLoader, SnapshotRecord, SnapshotWriter,
};

//! Storage Module
//!
//! This module provides the core storage functionality for TeaDB:
//! a thread-safe, sharded key-value store with per-entry TTLs and
//! a background expiry sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use teadb::storage::Store;
//! use bytes::Bytes;
//!
//! let store = Store::new();
//!
//! store.create("session", Bytes::from("token123"), 3600).unwrap();
//! assert_eq!(store.get("session"), Ok(Bytes::from("token123")));
//!
//! store.update("session", Bytes::from("token456")).unwrap();
//! store.delete("session").unwrap();
//! assert!(store.get("session").is_err());
//! ```

pub mod clock;
pub mod engine;
pub mod expiry;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{parse_ttl_seconds, Entry, Store, StoreError, StoreResult};
pub use expiry::{sweep_once, ExpiryConfig, ExpirySweeper};

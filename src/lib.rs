//! # TeaDB - A Small Networked Key-Value Store
//!
//! TeaDB keeps string keys and values in memory, each with an optional
//! time-to-live, and serves them over two front ends that share one store:
//! a line-oriented TCP protocol behind a username/password login, and a JSON
//! HTTP API. The store is snapshotted to a JSON file in the background and
//! reloaded on startup.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               TeaDB                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │──┐               │
//! │  │ (Listener)  │    │  (session)  │    │  Handler    │  │               │
//! │  └─────────────┘    └─────────────┘    └─────────────┘  │               │
//! │  ┌─────────────┐    ┌─────────────┐                     │               │
//! │  │ HTTP Server │───>│   Routes    │─────────────────────┤               │
//! │  │  (axum)     │    │             │                     │               │
//! │  └─────────────┘    └─────────────┘                     ▼               │
//! │                     ┌──────────────────────────────────────────────┐    │
//! │                     │                  Store                       │    │
//! │                     │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │    │
//! │                     │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...N    │ │    │
//! │                     │  │RwLock  │ │RwLock  │ │RwLock  │ │shards  │ │    │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │    │
//! │                     └──────────────────────────────────────────────┘    │
//! │                          ▲                              ▲               │
//! │                          │                              │               │
//! │              ┌───────────┴──────────┐      ┌────────────┴───────────┐   │
//! │              │    ExpirySweeper     │      │   SnapshotPersister    │   │
//! │              │ (background task)    │      │  (background task)     │   │
//! │              └──────────────────────┘      └────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use teadb::{Config, Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_or_create("config.json".as_ref())?;
//!     Server::bind(config).await?.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## TCP Commands
//!
//! After the login prompts, one command per line:
//!
//! - `SET key value ttl_seconds` (ttl 0 never expires)
//! - `GET key`
//! - `UPDATE key value` (keeps the original expiry)
//! - `DELETE key`
//! - `COUNT`
//! - `PING` (replies `PONG`)
//! - `QUIT`
//!
//! ## Module Overview
//!
//! - [`storage`]: Sharded store with TTLs, the clock and the expiry sweeper
//! - [`persistence`]: JSON snapshot writer, loader and periodic persister
//! - [`protocol`]: Line framing and command parsing for the TCP protocol
//! - [`commands`]: Executes parsed commands and formats replies
//! - [`connection`]: Per-client TCP session with login
//! - [`http`]: JSON HTTP API
//! - [`config`]: JSON configuration file
//! - [`server`]: Wires everything into a running process
//!
//! ## Lazy + Active Expiry
//!
//! Keys with a TTL are expired in two ways:
//! 1. **Lazy**: Every read checks the expiry, so an expired key is never
//!    returned even if the sweeper hasn't run yet
//! 2. **Active**: A background task periodically removes expired keys
//!
//! Expiry times are absolute UTC timestamps, so a key's deadline survives a
//! restart through the snapshot file.

pub mod commands;
pub mod config;
pub mod connection;
pub mod http;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandHandler, Reply};
pub use config::Config;
pub use connection::{
    handle_connection, ConnectionStats, Credentials, SessionSettings, StatsSnapshot,
};
pub use persistence::{SnapshotLoader, SnapshotPersister, SnapshotWriter};
pub use server::{Server, ServerError};
pub use storage::{ExpiryConfig, ExpirySweeper, Store, StoreError};

/// Config file read when `--config` isn't given
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Version of TeaDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

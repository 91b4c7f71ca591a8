//! Server Configuration
//!
//! TeaDB reads a single JSON file at startup (default `config.json`). If the
//! file doesn't exist it is created with the defaults below, so a first run
//! needs no setup. Missing fields fall back to their defaults.
//!
//! ```json
//! {
//!   "host": "0.0.0.0",
//!   "http_port": 8080,
//!   "tcp_port": 9000,
//!   "username": "tea",
//!   "password": "tea",
//!   "store_path": "store.json",
//!   "expire_interval_seconds": 1,
//!   "snapshot_interval_seconds": 1,
//!   "idle_timeout_seconds": 0,
//!   "max_connections": 10000
//! }
//! ```
//!
//! Config files from earlier releases still load: `expire_time` is read as
//! `expire_interval_seconds`, and ports may be written as strings
//! (`"http_port": "8080"`).
//!
//! The configuration is loaded once and never changes while the process runs.

use crate::connection::{Credentials, SessionSettings};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::info;

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("failed to read config file '{}': {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    /// Failed to write the config file
    #[error("failed to write config file '{}': {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    /// The file isn't valid JSON for a config
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to serialize the config
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A field has an unusable value
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Server configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interface both listeners bind to
    pub host: String,
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub http_port: u16,
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub tcp_port: u16,
    /// Credentials for TCP sessions
    pub username: String,
    pub password: String,
    /// Snapshot file
    pub store_path: PathBuf,
    /// Seconds between expiry sweeps
    #[serde(alias = "expire_time")]
    pub expire_interval_seconds: u64,
    /// Seconds between snapshot writes
    pub snapshot_interval_seconds: u64,
    /// Close idle TCP sessions after this many seconds (0 = never)
    pub idle_timeout_seconds: u64,
    /// TCP sessions allowed at once; further clients are turned away
    pub max_connections: usize,
}

/// Accepts `8080` as well as `"8080"`.
fn port_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text.trim().parse().map_err(|_| {
            serde::de::Error::custom(format!("invalid port '{}': expected 0-65535", text))
        }),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            tcp_port: 9000,
            username: "tea".to_string(),
            password: "tea".to_string(),
            store_path: PathBuf::from("store.json"),
            expire_interval_seconds: 1,
            snapshot_interval_seconds: 1,
            idle_timeout_seconds: 0,
            max_connections: 10_000,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("http_port", &self.http_port)
            .field("tcp_port", &self.tcp_port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("store_path", &self.store_path)
            .field("expire_interval_seconds", &self.expire_interval_seconds)
            .field("snapshot_interval_seconds", &self.snapshot_interval_seconds)
            .field("idle_timeout_seconds", &self.idle_timeout_seconds)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl Config {
    /// Loads `path`, writing a default config there first if it's missing.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            info!(path = %path.display(), "Default config file created");
            return Ok(config);
        }

        Self::load(path)
    }

    /// Loads and validates an existing config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Writes the config as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text + "\n").map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(ConfigError::Invalid("username must not be empty".to_string()));
        }
        if self.expire_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "expire_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.snapshot_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "snapshot_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.max_connections == 0 || self.max_connections > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid(format!(
                "max_connections must be between 1 and {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.store_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store_path must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn tcp_address(&self) -> String {
        format!("{}:{}", self.host, self.tcp_port)
    }

    pub fn http_address(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    pub fn expire_interval(&self) -> Duration {
        Duration::from_secs(self.expire_interval_seconds)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_seconds)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_seconds > 0).then(|| Duration::from_secs(self.idle_timeout_seconds))
    }

    /// Settings shared by every TCP session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::new(Credentials::new(&self.username, &self.password))
            .with_idle_timeout(self.idle_timeout())
    }
}

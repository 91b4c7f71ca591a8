//! Server Wiring
//!
//! Builds the running process out of the other modules:
//!
//! 1. Load the snapshot at `store_path` into a fresh store. A corrupt file
//!    aborts startup.
//! 2. Start the expiry sweeper and the snapshot persister.
//! 3. Bind the TCP and HTTP listeners and serve both until shutdown.
//! 4. On shutdown stop accepting, end the open TCP sessions, stop the
//!    sweeper and write a final snapshot, then log the connection counters.
//!
//! At most `max_connections` TCP sessions run at once. A client arriving at
//! the limit is sent `Too many connections` and disconnected.
//!
//! Binding is split from serving so callers can bind to port 0 and read the
//! real addresses back before any client connects.

use crate::commands::CommandHandler;
use crate::config::{Config, ConfigError};
use crate::connection::{handle_connection, ConnectionStats, SessionSettings, StatsSnapshot};
use crate::http;
use crate::persistence::{SnapshotError, SnapshotLoader, SnapshotPersister, SnapshotWriter};
use crate::storage::{ExpiryConfig, ExpirySweeper, Store};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept` so a persistent error can't spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Sent to a client that arrives when every session slot is taken
pub const TOO_MANY_CONNECTIONS: &str = "Too many connections";

/// Errors that stop the server from starting or running.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The snapshot on disk could not be loaded
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("server I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// A server with both listeners bound, ready to serve.
#[derive(Debug)]
pub struct Server {
    config: Config,
    store: Arc<Store>,
    tcp_listener: TcpListener,
    http_listener: TcpListener,
    stats: Arc<ConnectionStats>,
}

impl Server {
    /// Loads the snapshot into a new store and binds both listeners.
    pub async fn bind(config: Config) -> Result<Self> {
        Self::bind_with_store(config, Arc::new(Store::new())).await
    }

    /// Like [`Server::bind`], but loads the snapshot into `store`.
    pub async fn bind_with_store(config: Config, store: Arc<Store>) -> Result<Self> {
        config.validate()?;

        SnapshotLoader::new(&config.store_path).load_into(&store)?;

        let tcp_listener = bind_listener(&config.tcp_address()).await?;
        let http_listener = bind_listener(&config.http_address()).await?;

        Ok(Self {
            config,
            store,
            tcp_listener,
            http_listener,
            stats: Arc::new(ConnectionStats::new()),
        })
    }

    pub fn tcp_addr(&self) -> io::Result<SocketAddr> {
        self.tcp_listener.local_addr()
    }

    pub fn http_addr(&self) -> io::Result<SocketAddr> {
        self.http_listener.local_addr()
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Serves until Ctrl+C.
    pub async fn run(self) -> Result<StatsSnapshot> {
        self.run_until(shutdown_signal()).await
    }

    /// Serves until `shutdown` resolves, then stops the background tasks and
    /// writes a final snapshot.
    ///
    /// Returns the TCP connection counters as they stood at shutdown; the
    /// same summary is logged.
    pub async fn run_until<F>(self, shutdown: F) -> Result<StatsSnapshot>
    where
        F: Future<Output = ()>,
    {
        let Server {
            config,
            store,
            tcp_listener,
            http_listener,
            stats,
        } = self;

        let sweeper = ExpirySweeper::start(
            Arc::clone(&store),
            ExpiryConfig::with_interval(config.expire_interval()),
        );
        let persister = SnapshotPersister::start(
            Arc::clone(&store),
            SnapshotWriter::new(&config.store_path),
            config.snapshot_interval(),
        );

        let (stop_tx, stop_rx) = watch::channel(false);

        let tcp_task = tokio::spawn(accept_loop(
            tcp_listener,
            Arc::clone(&store),
            Arc::new(config.session_settings()),
            Arc::clone(&stats),
            config.max_connections,
            stop_rx.clone(),
        ));

        let mut http_stop = stop_rx;
        let http_task = tokio::spawn(http::serve(http_listener, Arc::clone(&store), async move {
            let _ = http_stop.changed().await;
        }));

        shutdown.await;
        info!("Shutting down");
        let _ = stop_tx.send(true);

        if let Err(e) = tcp_task.await {
            error!(error = %e, "TCP listener task failed");
        }
        let http_result = match http_task.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "HTTP server task failed");
                Ok(())
            }
        };

        sweeper.stop();
        persister.shutdown().await;

        let summary = stats.snapshot();
        info!(entries = store.count(), stats = %summary, "Server shutdown complete");

        http_result.map_err(ServerError::from)?;
        Ok(summary)
    }
}

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Accepts TCP clients until a value is sent on `shutdown` (or its sender is
/// dropped), spawning a session task per client.
///
/// At most `max_connections` sessions run at once; a client over the limit
/// gets [`TOO_MANY_CONNECTIONS`] and is disconnected. Sessions still open at
/// shutdown are ended before this returns. Each command runs to completion
/// without yielding, so a session is only cut between commands.
pub async fn accept_loop(
    listener: TcpListener,
    store: Arc<Store>,
    settings: Arc<SessionSettings>,
    stats: Arc<ConnectionStats>,
    max_connections: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, max_connections, "TCP server listening");
    }

    let slots = Arc::new(Semaphore::new(max_connections));
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let permit = match Arc::clone(&slots).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            stats.connection_rejected();
                            warn!(client = %addr, max_connections, "Connection limit reached");
                            tokio::spawn(refuse(stream));
                            continue;
                        }
                    };

                    let handler = CommandHandler::new(Arc::clone(&store));
                    let settings = Arc::clone(&settings);
                    let stats = Arc::clone(&stats);

                    sessions.spawn(async move {
                        handle_connection(stream, addr, handler, settings, stats).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!(error = %e, "Session task panicked");
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    info!(open_sessions = sessions.len(), "TCP server stopped accepting");
    sessions.shutdown().await;
}

/// Tells a client over the connection limit why it is being dropped.
async fn refuse(mut stream: TcpStream) {
    let line = format!("{}\n", TOO_MANY_CONNECTIONS);
    if let Err(e) = stream.write_all(line.as_bytes()).await {
        debug!(error = %e, "Failed to send refusal");
    }
    let _ = stream.shutdown().await;
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            // Without a signal handler the only way out is killing the process
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}

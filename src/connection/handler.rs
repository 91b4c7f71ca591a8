//! Connection Handler Module
//!
//! This module runs the TCP session for one client. Each client gets its own
//! handler task, which authenticates the client once and then loops reading
//! command lines and sending replies.
//!
//! ## Session State Machine
//!
//! ```text
//!            accept
//!              │  "Connected to TeaDB"
//!              ▼
//!    ┌───────────────────┐
//!    │ AwaitingUsername  │  "Username: "  ── read error ──┐
//!    └─────────┬─────────┘                                │
//!              │ line                                     │
//!              ▼                                          │
//!    ┌───────────────────┐                                │
//!    │ AwaitingPassword  │  "Password: "  ── read error ──┤
//!    └─────────┬─────────┘                                │
//!              │ line                                     │
//!     match? ──┴── no ── "Invalid username or password" ──┤
//!              │ yes                                      │
//!              ▼ "Authenticated"                          │
//!    ┌───────────────────┐                                │
//!    │   CommandLoop     │ ◄─┐ reply (errors included)    │
//!    └─────────┬─────────┘ ──┘                            │
//!              │ QUIT / read error                        │
//!              ▼                                          │
//!    ┌───────────────────┐                                │
//!    │      Closed       │ ◄──────────────────────────────┘
//!    └───────────────────┘
//! ```
//!
//! There is exactly one authentication attempt per connection. Anything the
//! client pipelined after a rejected password is discarded unread.
//!
//! ## Buffer Management
//!
//! Incoming data accumulates in a `BytesMut` buffer because TCP may deliver
//! partial lines, or several lines in a single read.

use crate::commands::CommandHandler;
use crate::protocol::{next_line, LineError};
use bytes::BytesMut;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// First line every client receives
pub const GREETING: &str = "Connected to TeaDB";

/// Username and password a client must present.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Exact, case-sensitive comparison of both fields.
    ///
    /// Both comparisons always run, in constant time for equal lengths.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok = self.username.as_bytes().ct_eq(username.as_bytes());
        let pass_ok = self.password.as_bytes().ct_eq(password.as_bytes());
        (user_ok & pass_ok).into()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-server settings every session shares.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub credentials: Credentials,
    /// Close the session if a read waits longer than this
    pub idle_timeout: Option<Duration>,
}

impl SessionSettings {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingUsername,
    AwaitingPassword,
    CommandLoop,
    Closed,
}

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Connections turned away at the connection limit
    pub connections_rejected: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Rejected login attempts
    pub auth_failures: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_failed(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Reads every counter at once, for reporting.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            commands_processed: self.commands_processed.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub active_connections: u64,
    pub auth_failures: u64,
    pub commands_processed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepted={} rejected={} active={} auth_failures={} commands={} \
             bytes_read={} bytes_written={}",
            self.connections_accepted,
            self.connections_rejected,
            self.active_connections,
            self.auth_failures,
            self.commands_processed,
            self.bytes_read,
            self.bytes_written,
        )
    }
}

/// Handles a single client connection.
///
/// Generic over the stream so sessions can run over anything that reads and
/// writes bytes; the server uses `TcpStream`.
pub struct ConnectionHandler<S> {
    /// The stream for this connection
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// Executes commands once authenticated
    command_handler: CommandHandler,

    /// Credentials and timeouts (shared)
    settings: Arc<SessionSettings>,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    state: SessionState,

    /// Username read in `AwaitingUsername`, checked in `AwaitingPassword`
    pending_username: Option<String>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        settings: Arc<SessionSettings>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            settings,
            stats,
            state: SessionState::AwaitingUsername,
            pending_username: None,
        }
    }

    /// Runs the session until it closes.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;
        self.state = SessionState::Closed;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    info!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::AuthFailed { username } => {
                    warn!(client = %self.addr, username = %username, "Authentication failed")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        self.send_line(GREETING).await?;

        while self.state != SessionState::Closed {
            self.state = self.step().await?;
        }
        Ok(())
    }

    /// Performs one transition of the state machine.
    async fn step(&mut self) -> Result<SessionState, ConnectionError> {
        match self.state {
            SessionState::AwaitingUsername => {
                self.send_prompt("Username: ").await?;
                self.pending_username = Some(self.read_line().await?);
                Ok(SessionState::AwaitingPassword)
            }
            SessionState::AwaitingPassword => {
                self.send_prompt("Password: ").await?;
                let password = self.read_line().await?;
                let username = self.pending_username.take().unwrap_or_default();

                if !self.settings.credentials.verify(&username, &password) {
                    self.stats.auth_failed();
                    self.send_line("Invalid username or password").await?;
                    return Err(ConnectionError::AuthFailed { username });
                }

                debug!(client = %self.addr, username = %username, "Client authenticated");
                self.send_line("Authenticated").await?;
                Ok(SessionState::CommandLoop)
            }
            SessionState::CommandLoop => {
                let line = self.read_line().await?;
                let reply = self.command_handler.execute_line(&line);
                self.stats.command_processed();
                self.send_line(reply.text()).await?;

                if reply.closes_session() {
                    Ok(SessionState::Closed)
                } else {
                    Ok(SessionState::CommandLoop)
                }
            }
            SessionState::Closed => Ok(SessionState::Closed),
        }
    }

    /// Returns the next complete line, reading from the socket as needed.
    async fn read_line(&mut self) -> Result<String, ConnectionError> {
        loop {
            if let Some(line) = next_line(&mut self.buffer)? {
                trace!(
                    client = %self.addr,
                    remaining = self.buffer.len(),
                    "Parsed line"
                );
                return Ok(line);
            }

            self.read_more_data().await?;
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        // Ensure we have some capacity
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let read = self.stream.get_mut().read_buf(&mut self.buffer);
        let n = match self.settings.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| ConnectionError::IdleTimeout(limit))??,
            None => read.await?,
        };

        if n == 0 {
            // Connection closed by client
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial line in buffer
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    async fn send_line(&mut self, text: &str) -> Result<(), ConnectionError> {
        self.stream.write_all(text.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;
        self.stats.bytes_written(text.len() + 1);
        Ok(())
    }

    /// Prompts stay on the same line as the client's answer.
    async fn send_prompt(&mut self, prompt: &str) -> Result<(), ConnectionError> {
        self.stream.write_all(prompt.as_bytes()).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(prompt.len());
        Ok(())
    }
}

// Also runs when the session task is aborted at shutdown
impl<S> Drop for ConnectionHandler<S> {
    fn drop(&mut self) {
        self.stats.connection_closed();
    }
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Line framing error
    #[error("Protocol error: {0}")]
    Line(#[from] LineError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial line)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Wrong username or password
    #[error("Authentication failed for user '{username}'")]
    AuthFailed { username: String },

    /// No data arrived within the idle timeout
    #[error("Idle for more than {0:?}")]
    IdleTimeout(Duration),
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    settings: Arc<SessionSettings>,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, settings, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected | ConnectionError::AuthFailed { .. } => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn settings() -> Arc<SessionSettings> {
        Arc::new(SessionSettings::new(Credentials::new("tea", "s3cret")))
    }

    fn handler_for<S>(
        stream: S,
        store: Arc<Store>,
        stats: Arc<ConnectionStats>,
    ) -> ConnectionHandler<S>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        ConnectionHandler::new(stream, test_addr(), CommandHandler::new(store), settings(), stats)
    }

    /// Script for a client that logs in successfully.
    fn logged_in() -> Builder {
        let mut builder = Builder::new();
        builder
            .write(b"Connected to TeaDB\n")
            .write(b"Username: ")
            .read(b"tea\n")
            .write(b"Password: ")
            .read(b"s3cret\n")
            .write(b"Authenticated\n");
        builder
    }

    #[test]
    fn test_credentials_verify() {
        let creds = Credentials::new("tea", "s3cret");
        assert!(creds.verify("tea", "s3cret"));
        assert!(!creds.verify("Tea", "s3cret"));
        assert!(!creds.verify("tea", "S3CRET"));
        assert!(!creds.verify("tea", "s3cret "));
        assert!(!creds.verify("", ""));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("tea", "s3cret"));
        assert!(rendered.contains("tea"));
        assert!(!rendered.contains("s3cret"));
    }

    #[tokio::test]
    async fn test_login_and_commands() {
        let store = Arc::new(Store::new());
        let stats = Arc::new(ConnectionStats::new());

        let mock = logged_in()
            .read(b"SET orange juice 5\n")
            .write(b"Key: orange Value: juice with TTL of 5 seconds added to store\n")
            .read(b"GET orange\n")
            .write(b"juice\n")
            .build();

        let result = handler_for(mock, Arc::clone(&store), Arc::clone(&stats)).run().await;

        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
        assert_eq!(store.get("orange").unwrap(), bytes::Bytes::from("juice"));
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_stats_snapshot_after_session() {
        let stats = Arc::new(ConnectionStats::new());
        let mock = logged_in().read(b"COUNT\n").write(b"0\n").build();

        let _ = handler_for(mock, Arc::new(Store::new()), Arc::clone(&stats)).run().await;

        let snapshot = stats.snapshot();
        assert_eq!(
            snapshot,
            StatsSnapshot {
                connections_accepted: 1,
                connections_rejected: 0,
                active_connections: 0,
                auth_failures: 0,
                commands_processed: 1,
                // tea\n s3cret\n COUNT\n
                bytes_read: 17,
                // greeting, two prompts, Authenticated\n, 0\n
                bytes_written: 55,
            }
        );
        assert_eq!(
            snapshot.to_string(),
            "accepted=1 rejected=0 active=0 auth_failures=0 commands=1 \
             bytes_read=17 bytes_written=55"
        );
    }

    #[tokio::test]
    async fn test_crlf_and_split_reads() {
        let store = Arc::new(Store::new());

        let mock = Builder::new()
            .write(b"Connected to TeaDB\n")
            .write(b"Username: ")
            .read(b"te")
            .read(b"a\r\n")
            .write(b"Password: ")
            .read(b"s3cret\r\nCOU")
            .write(b"Authenticated\n")
            .read(b"NT\r\n")
            .write(b"0\n")
            .build();

        let result = handler_for(mock, store, Arc::new(ConnectionStats::new())).run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_malformed_commands_keep_session_open() {
        let store = Arc::new(Store::new());

        let mock = logged_in()
            .read(b"SET orange juice\n")
            .write(b"ERR wrong number of arguments, usage: SET key value ttl\n")
            .read(b"SET orange juice soon\n")
            .write(b"ERR invalid ttl 'soon': must be a non-negative integer\n")
            .read(b"\n")
            .write(b"Invalid command: \n")
            .read(b"DANCE\n")
            .write(b"Invalid command: DANCE\n")
            .read(b"SET orange juice 5\n")
            .write(b"Key: orange Value: juice with TTL of 5 seconds added to store\n")
            .build();

        let result = handler_for(mock, Arc::clone(&store), Arc::new(ConnectionStats::new()))
            .run()
            .await;

        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn test_wrong_password_closes_session() {
        let store = Arc::new(Store::new());
        let stats = Arc::new(ConnectionStats::new());

        let mock = Builder::new()
            .write(b"Connected to TeaDB\n")
            .write(b"Username: ")
            .read(b"tea\n")
            .write(b"Password: ")
            .read(b"guess\n")
            .write(b"Invalid username or password\n")
            .build();

        let result = handler_for(mock, Arc::clone(&store), Arc::clone(&stats)).run().await;

        assert!(matches!(
            result,
            Err(ConnectionError::AuthFailed { ref username }) if username == "tea"
        ));
        assert_eq!(stats.auth_failures.load(Ordering::Relaxed), 1);
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_pipelined_commands_after_bad_login_are_ignored() {
        let store = Arc::new(Store::new());

        // Everything arrives in one packet; only the login lines are consumed
        let mock = Builder::new()
            .write(b"Connected to TeaDB\n")
            .write(b"Username: ")
            .read(b"tea\nwrong\nSET a b 10\n")
            .write(b"Password: ")
            .write(b"Invalid username or password\n")
            .build();

        let result = handler_for(mock, Arc::clone(&store), Arc::new(ConnectionStats::new()))
            .run()
            .await;

        assert!(matches!(result, Err(ConnectionError::AuthFailed { .. })));
        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn test_quit_closes_gracefully() {
        let mock = logged_in().read(b"QUIT\n").write(b"Bye\n").build();

        let result = handler_for(mock, Arc::new(Store::new()), Arc::new(ConnectionStats::new()))
            .run()
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_mid_line() {
        let mock = logged_in().read(b"GET ora").build();

        let result = handler_for(mock, Arc::new(Store::new()), Arc::new(ConnectionStats::new()))
            .run()
            .await;
        assert!(matches!(result, Err(ConnectionError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_disconnect_before_password() {
        let stats = Arc::new(ConnectionStats::new());
        let mock = Builder::new()
            .write(b"Connected to TeaDB\n")
            .write(b"Username: ")
            .read(b"tea\n")
            .write(b"Password: ")
            .build();

        let result = handler_for(mock, Arc::new(Store::new()), Arc::clone(&stats)).run().await;

        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
        assert_eq!(stats.auth_failures.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let settings = Arc::new(
            SessionSettings::new(Credentials::new("tea", "tea"))
                .with_idle_timeout(Some(Duration::from_millis(100))),
        );

        let server = tokio::spawn(async move {
            let (stream, client_addr) = listener.accept().await.unwrap();
            let handler = CommandHandler::new(Arc::new(Store::new()));
            let stats = Arc::new(ConnectionStats::new());
            ConnectionHandler::new(stream, client_addr, handler, settings, stats)
                .run()
                .await
        });

        let client = TcpStream::connect(addr).await.unwrap();
        let mut reader = BufReader::new(client);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "Connected to TeaDB\n");

        // Say nothing; the server gives up and hangs up
        let result = server.await.unwrap();
        assert!(matches!(result, Err(ConnectionError::IdleTimeout(_))));

        let mut rest = String::new();
        reader.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "Username: ");
    }
}

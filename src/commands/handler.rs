//! Command Handler Module
//!
//! Executes parsed TCP commands against the store and renders the reply
//! line the client sees.
//!
//! ## Replies
//!
//! | Command       | Success                                                  |
//! |---------------|----------------------------------------------------------|
//! | `SET k v ttl` | `Key: k Value: v with TTL of ttl seconds added to store` |
//! | `GET k`       | the raw value                                            |
//! | `DELETE k`    | `Key k deleted`                                          |
//! | `UPDATE k v`  | `Key k updated`                                          |
//! | `COUNT`       | number of live keys                                      |
//! | `PING`        | `PONG`                                                   |
//! | `QUIT`        | `Bye`, then the session closes                           |
//!
//! `SET` on an existing key replies `Key k already exists`; `GET`, `DELETE`
//! and `UPDATE` on a missing key reply `Key k not found`.
//!
//! Malformed lines get the parse error's message and the session continues.

use crate::protocol::Command;
use crate::storage::{Store, StoreError};
use std::sync::Arc;
use tracing::trace;

/// What to send back, and whether the session should end afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Send the line and keep reading commands
    Continue(String),
    /// Send the line and close the connection
    Close(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Continue(text) | Reply::Close(text) => text,
        }
    }

    pub fn closes_session(&self) -> bool {
        matches!(self, Reply::Close(_))
    }
}

/// Handles TCP commands by dispatching them to the store.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    /// The shared store
    store: Arc<Store>,
}

impl CommandHandler {
    /// Creates a new command handler with the given store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Parses and executes one command line.
    pub fn execute_line(&self, line: &str) -> Reply {
        match Command::parse(line) {
            Ok(command) => self.execute(command),
            Err(e) => Reply::Continue(e.to_string()),
        }
    }

    /// Executes a command and returns the reply.
    pub fn execute(&self, command: Command) -> Reply {
        trace!(command = command.name(), "Executing command");

        match command {
            Command::Set {
                key,
                value,
                ttl_seconds,
            } => self.cmd_set(key, value, ttl_seconds),
            Command::Get { key } => self.cmd_get(&key),
            Command::Delete { key } => self.cmd_delete(&key),
            Command::Update { key, value } => self.cmd_update(&key, value),
            Command::Count => Reply::Continue(self.store.count().to_string()),
            Command::Ping => Reply::Continue("PONG".to_string()),
            Command::Quit => Reply::Close("Bye".to_string()),
        }
    }

    fn cmd_set(&self, key: String, value: String, ttl_seconds: u64) -> Reply {
        let text = match self.store.create(&key, value.clone(), ttl_seconds) {
            Ok(()) => format!(
                "Key: {} Value: {} with TTL of {} seconds added to store",
                key, value, ttl_seconds
            ),
            Err(e) => error_text(e),
        };
        Reply::Continue(text)
    }

    fn cmd_get(&self, key: &str) -> Reply {
        let text = match self.store.get(key) {
            Ok(value) => String::from_utf8_lossy(&value).into_owned(),
            Err(e) => error_text(e),
        };
        Reply::Continue(text)
    }

    fn cmd_delete(&self, key: &str) -> Reply {
        let text = match self.store.delete(key) {
            Ok(()) => format!("Key {} deleted", key),
            Err(e) => error_text(e),
        };
        Reply::Continue(text)
    }

    fn cmd_update(&self, key: &str, value: String) -> Reply {
        let text = match self.store.update(key, value) {
            Ok(()) => format!("Key {} updated", key),
            Err(e) => error_text(e),
        };
        Reply::Continue(text)
    }
}

/// Renders a store error as a reply line.
fn error_text(err: StoreError) -> String {
    match err {
        StoreError::AlreadyExists(key) => format!("Key {} already exists", key),
        StoreError::NotFound(key) => format!("Key {} not found", key),
        StoreError::InvalidArgument(reason) => format!("ERR {}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ManualClock;
    use chrono::Duration;

    fn create_handler() -> CommandHandler {
        CommandHandler::new(Arc::new(Store::new()))
    }

    fn cont(text: &str) -> Reply {
        Reply::Continue(text.to_string())
    }

    #[test]
    fn test_set_get() {
        let handler = create_handler();

        assert_eq!(
            handler.execute_line("SET orange juice 5"),
            cont("Key: orange Value: juice with TTL of 5 seconds added to store")
        );
        assert_eq!(handler.execute_line("GET orange"), cont("juice"));
    }

    #[test]
    fn test_set_existing_key() {
        let handler = create_handler();

        handler.execute_line("SET k v1 10");
        assert_eq!(handler.execute_line("SET k v2 10"), cont("Key k already exists"));
        assert_eq!(handler.execute_line("GET k"), cont("v1"));
    }

    #[test]
    fn test_get_nonexistent() {
        let handler = create_handler();
        assert_eq!(handler.execute_line("GET nope"), cont("Key nope not found"));
    }

    #[test]
    fn test_delete() {
        let handler = create_handler();

        handler.execute_line("SET k v 10");
        assert_eq!(handler.execute_line("DELETE k"), cont("Key k deleted"));
        assert_eq!(handler.execute_line("DELETE k"), cont("Key k not found"));
        assert_eq!(handler.execute_line("GET k"), cont("Key k not found"));
    }

    #[test]
    fn test_update() {
        let handler = create_handler();

        assert_eq!(handler.execute_line("UPDATE k v"), cont("Key k not found"));
        handler.execute_line("SET k v 10");
        assert_eq!(handler.execute_line("UPDATE k v2"), cont("Key k updated"));
        assert_eq!(handler.execute_line("GET k"), cont("v2"));
    }

    #[test]
    fn test_count() {
        let handler = create_handler();

        assert_eq!(handler.execute_line("COUNT"), cont("0"));
        handler.execute_line("SET a 1 10");
        handler.execute_line("SET b 2 0");
        assert_eq!(handler.execute_line("COUNT"), cont("2"));
    }

    #[test]
    fn test_expired_key_reads_as_not_found() {
        let clock = Arc::new(ManualClock::new());
        let handler = CommandHandler::new(Arc::new(Store::with_clock(clock.clone())));

        handler.execute_line("SET orange juice 5");
        clock.advance(Duration::seconds(5));
        assert_eq!(handler.execute_line("GET orange"), cont("Key orange not found"));
    }

    #[test]
    fn test_malformed_commands_continue() {
        let handler = create_handler();

        for line in ["SET a b", "SET a b x", "SET a b -1", "GET", "", "HELLO"] {
            let reply = handler.execute_line(line);
            assert!(!reply.closes_session(), "{:?} closed the session", line);
        }
        assert_eq!(handler.execute_line("HELLO"), cont("Invalid command: HELLO"));
        assert_eq!(
            handler.execute_line("SET a b x"),
            cont("ERR invalid ttl 'x': must be a non-negative integer")
        );
    }

    #[test]
    fn test_out_of_range_ttl() {
        let handler = create_handler();
        let reply = handler.execute_line(&format!("SET k v {}", u64::MAX));
        assert!(reply.text().starts_with("ERR "));
        assert_eq!(handler.execute_line("GET k"), cont("Key k not found"));
    }

    #[test]
    fn test_quit() {
        let handler = create_handler();
        let reply = handler.execute_line("quit");
        assert!(reply.closes_session());
        assert_eq!(reply.text(), "Bye");
    }

    #[test]
    fn test_quit_with_arguments_keeps_session_open() {
        let handler = create_handler();
        let reply = handler.execute_line("QUIT please");
        assert!(!reply.closes_session());
        assert_eq!(reply.text(), "ERR wrong number of arguments, usage: QUIT");
    }

    #[test]
    fn test_ping() {
        let handler = create_handler();
        assert_eq!(handler.execute_line("PING"), cont("PONG"));
    }
}

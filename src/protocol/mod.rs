//! TeaDB Line Protocol
//!
//! The TCP front speaks plain text: every request and every response is a
//! `\n`-terminated line.
//!
//! ## Modules
//!
//! - `line`: Incremental framing of a byte stream into lines
//! - `command`: Parsing a line into a typed `Command`
//!
//! ## Example
//!
//! ```
//! use teadb::protocol::{next_line, Command};
//! use bytes::BytesMut;
//!
//! let mut buffer = BytesMut::from(&b"SET orange juice 5\nGET ora"[..]);
//!
//! let line = next_line(&mut buffer).unwrap().unwrap();
//! assert_eq!(
//!     Command::parse(&line).unwrap(),
//!     Command::Set { key: "orange".into(), value: "juice".into(), ttl_seconds: 5 }
//! );
//!
//! // The second line is incomplete
//! assert!(next_line(&mut buffer).unwrap().is_none());
//! ```

pub mod command;
pub mod line;

// Re-export commonly used types for convenience
pub use command::{Command, CommandError};
pub use line::{next_line, LineError, MAX_LINE_LENGTH};

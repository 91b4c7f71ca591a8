//! TCP Command Parsing
//!
//! Turns one text line into a typed [`Command`]. Tokens are separated by
//! any run of whitespace; the command name is case-insensitive, keys and
//! values are taken verbatim.
//!
//! | Line                   | Command                 |
//! |------------------------|-------------------------|
//! | `SET key value ttl`    | [`Command::Set`]        |
//! | `GET key`              | [`Command::Get`]        |
//! | `DELETE key`           | [`Command::Delete`]     |
//! | `UPDATE key value`     | [`Command::Update`]     |
//! | `COUNT`                | [`Command::Count`]      |
//! | `PING`                 | [`Command::Ping`]       |
//! | `QUIT`                 | [`Command::Quit`]       |

use crate::storage::parse_ttl_seconds;
use thiserror::Error;

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set {
        key: String,
        value: String,
        ttl_seconds: u64,
    },
    Get {
        key: String,
    },
    Delete {
        key: String,
    },
    Update {
        key: String,
        value: String,
    },
    Count,
    /// Keep-alive; answered with `PONG`
    Ping,
    Quit,
}

/// A line that could not be turned into a command.
///
/// None of these end the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Known command, wrong number of arguments
    #[error("ERR wrong number of arguments, usage: {usage}")]
    Usage { usage: &'static str },

    /// The TTL token isn't a non-negative integer
    #[error("ERR invalid ttl '{value}': must be a non-negative integer")]
    InvalidTtl { value: String },

    /// Unknown command name or a blank line
    #[error("Invalid command: {0}")]
    Unknown(String),
}

impl Command {
    /// Parses a single line (without its terminator).
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        let Some((name, args)) = tokens.split_first() else {
            return Err(CommandError::Unknown(line.to_string()));
        };

        match name.to_ascii_uppercase().as_str() {
            "SET" => match args {
                [key, value, ttl] => {
                    let ttl_seconds = parse_ttl_seconds(ttl).map_err(|_| CommandError::InvalidTtl {
                        value: ttl.to_string(),
                    })?;
                    Ok(Command::Set {
                        key: key.to_string(),
                        value: value.to_string(),
                        ttl_seconds,
                    })
                }
                _ => Err(CommandError::Usage {
                    usage: "SET key value ttl",
                }),
            },
            "GET" => match args {
                [key] => Ok(Command::Get { key: key.to_string() }),
                _ => Err(CommandError::Usage { usage: "GET key" }),
            },
            "DELETE" => match args {
                [key] => Ok(Command::Delete { key: key.to_string() }),
                _ => Err(CommandError::Usage { usage: "DELETE key" }),
            },
            "UPDATE" => match args {
                [key, value] => Ok(Command::Update {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
                _ => Err(CommandError::Usage {
                    usage: "UPDATE key value",
                }),
            },
            "COUNT" if args.is_empty() => Ok(Command::Count),
            "COUNT" => Err(CommandError::Usage { usage: "COUNT" }),
            "PING" if args.is_empty() => Ok(Command::Ping),
            "PING" => Err(CommandError::Usage { usage: "PING" }),
            "QUIT" if args.is_empty() => Ok(Command::Quit),
            "QUIT" => Err(CommandError::Usage { usage: "QUIT" }),
            _ => Err(CommandError::Unknown(line.to_string())),
        }
    }

    /// The command name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "SET",
            Command::Get { .. } => "GET",
            Command::Delete { .. } => "DELETE",
            Command::Update { .. } => "UPDATE",
            Command::Count => "COUNT",
            Command::Ping => "PING",
            Command::Quit => "QUIT",
        }
    }
}

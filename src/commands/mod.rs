//! Command Handler Module
//!
//! This module implements the command processing layer for TeaDB's TCP
//! front. It receives parsed commands, executes them against the store, and
//! returns the reply line.
//!
//! ## Architecture
//!
//! ```text
//! Client line
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Command::parse  │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Execute      │
//! │  - Render reply │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │     Store       │  (storage module)
//! └─────────────────┘
//! ```

pub mod handler;

// Re-export the main command handler
pub use handler::{CommandHandler, Reply};

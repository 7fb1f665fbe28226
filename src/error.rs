//! Error types for redwire
//!
//! Provides a unified error type for all operations.
//!
//! ## Fatality
//! - `Io`, `Protocol`, `Timeout`: the connection is torn down
//! - `Server`: an error reply from the remote, connection stays usable
//! - `InvalidState`: caller broke the mode rules, nothing was changed
//! - `Closed`: the connection was already closed

use std::io;

use thiserror::Error;

/// Result type alias using RedwireError
pub type Result<T> = std::result::Result<T, RedwireError>;

/// Unified error type for redwire operations
#[derive(Debug, Error)]
pub enum RedwireError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // -------------------------------------------------------------------------
    // Wire Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error: {0}")]
    Server(ServerError),

    // -------------------------------------------------------------------------
    // Connection Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Connection closed")]
    Closed,

    #[error("Timed out: {0}")]
    Timeout(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RedwireError {
    /// Whether this error tears the connection down
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RedwireError::Io(_) | RedwireError::Protocol(_) | RedwireError::Timeout(_)
        )
    }
}

/// An error reply sent by the server (`-ERR ...`, `!<len>\r\n...`)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ServerError {
    message: String,
}

impl ServerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Full error line without the leading marker
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Error code prefix such as `ERR`, `WRONGTYPE` or `NOAUTH`.
    ///
    /// Empty when the message does not start with an upper-case word.
    pub fn kind(&self) -> &str {
        let word = self.message.split(' ').next().unwrap_or("");
        if !word.is_empty() && word.bytes().all(|b| b.is_ascii_uppercase() || b == b'_') {
            word
        } else {
            ""
        }
    }
}

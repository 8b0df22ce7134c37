//! Error types for lawledger.
//!
//! Library crates use [`LawLedgerError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all lawledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LawLedgerError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Connectivity error, raised once the retry budget is exhausted.
    #[error("network error: {0}")]
    Network(String),

    /// Non-retryable HTTP status from the remote service.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// The remote service answered with an anti-automation challenge.
    #[error("anti-bot challenge: {0}")]
    AntiBot(String),

    /// Response, document or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Ledger / database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Headless browser handshake error.
    #[error("browser error: {0}")]
    Browser(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (unknown category, unsafe path, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LawLedgerError>;

impl LawLedgerError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error means the remote service rejected our session.
    pub fn is_anti_bot(&self) -> bool {
        matches!(self, Self::AntiBot(_))
    }
}

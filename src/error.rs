//! Error types for querytask.
//!
//! Defines the main error enum used throughout the pipeline, plus the shared
//! form in which errors cross task boundaries.

use std::sync::Arc;
use thiserror::Error;

/// Main error type for querytask operations.
#[derive(Error, Debug)]
pub enum QueryTaskError {
    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Statement execution errors (syntax errors, constraint violations, etc.)
    #[error("Statement error: {0}")]
    Statement(String),

    /// Errors raised while iterating a row-set.
    #[error("Cursor error: {0}")]
    Cursor(String),

    /// The driver cannot interrupt a running statement.
    #[error("Cancel not supported: {0}")]
    CancelUnsupported(String),

    /// Configuration errors (invalid config file, bad intervals, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryTaskError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a statement error with the given message.
    pub fn statement(msg: impl Into<String>) -> Self {
        Self::Statement(msg.into())
    }

    /// Creates a cursor error with the given message.
    pub fn cursor(msg: impl Into<String>) -> Self {
        Self::Cursor(msg.into())
    }

    /// Creates an unsupported-cancel error with the given message.
    pub fn cancel_unsupported(msg: impl Into<String>) -> Self {
        Self::CancelUnsupported(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if the driver reported that it cannot cancel statements.
    pub fn is_cancel_unsupported(&self) -> bool {
        matches!(self, Self::CancelUnsupported(_))
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Statement(_) => "Statement Error",
            Self::Cursor(_) => "Cursor Error",
            Self::CancelUnsupported(_) => "Cancel Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using QueryTaskError.
pub type Result<T> = std::result::Result<T, QueryTaskError>;

/// An error as delivered to task listeners.
///
/// Parents re-emit their children's errors by cloning this handle, so the
/// caller always receives the original error instance.
pub type SharedError = Arc<QueryTaskError>;

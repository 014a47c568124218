//! Error types for querymux.
//!
//! Defines the main error enum used throughout the crate.

use crate::session::SessionId;
use thiserror::Error;

/// Main error type for querymux operations.
#[derive(Error, Debug)]
pub enum QueryMuxError {
    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution errors (syntax errors, constraint violations, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// Cancellation request failures.
    #[error("Cancel error: {0}")]
    Cancel(String),

    /// Edit session errors (stale row cache, bad commit, etc.)
    #[error("Edit error: {0}")]
    Edit(String),

    /// No session is registered under the given handle.
    #[error("No session found for {0}")]
    SessionNotFound(SessionId),

    /// The session already has an execution in flight.
    #[error("Session {0} is busy with another execution")]
    SessionBusy(SessionId),

    /// Credential storage errors (keyring unavailable, no provider, etc.)
    #[error("Credential error: {0}")]
    Credential(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryMuxError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a cancel error with the given message.
    pub fn cancel(msg: impl Into<String>) -> Self {
        Self::Cancel(msg.into())
    }

    /// Creates an edit error with the given message.
    pub fn edit(msg: impl Into<String>) -> Self {
        Self::Edit(msg.into())
    }

    /// Creates a credential error with the given message.
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Cancel(_) => "Cancel Error",
            Self::Edit(_) => "Edit Error",
            Self::SessionNotFound(_) => "Session Not Found",
            Self::SessionBusy(_) => "Session Busy",
            Self::Credential(_) => "Credential Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns true if this error means the session could not be addressed
    /// at all, as opposed to an operation on it failing.
    pub fn is_session_error(&self) -> bool {
        matches!(self, Self::SessionNotFound(_) | Self::SessionBusy(_))
    }
}

/// Result type alias using QueryMuxError.
pub type Result<T> = std::result::Result<T, QueryMuxError>;

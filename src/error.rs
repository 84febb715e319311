//! Error types for Backhaul
//!
//! Provides a unified error type for all Backhaul operations.

use std::fmt;

/// Result type alias for Backhaul operations
pub type Result<T> = std::result::Result<T, BackhaulError>;

/// Main error type for Backhaul operations
#[derive(Debug)]
pub enum BackhaulError {
    /// Configuration error (missing/invalid policy or credential reference)
    Config(String),

    /// Database error
    Database(String),

    /// Object storage error
    Storage(String),

    /// Dump executor error
    Execution(String),

    /// Attempt timed out
    Timeout { attempt_id: String, duration_secs: u64 },

    /// Not found error
    NotFound(String),

    /// Conflicting state (e.g. duplicate non-terminal attempt)
    Conflict(String),

    /// IO error
    Io(std::io::Error),

    /// Serialization/deserialization error
    Serde(serde_json::Error),

    /// SQL error
    Sqlx(sqlx::Error),

    /// Generic error with message
    Other(String),
}

impl fmt::Display for BackhaulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Database(msg) => write!(f, "Database error: {}", msg),
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
            Self::Execution(msg) => write!(f, "Execution error: {}", msg),
            Self::Timeout { attempt_id, duration_secs } => {
                write!(f, "Attempt {} timed out after {} seconds", attempt_id, duration_secs)
            }
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Serde(err) => write!(f, "Serialization error: {}", err),
            Self::Sqlx(err) => write!(f, "SQL error: {}", err),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for BackhaulError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serde(err) => Some(err),
            Self::Sqlx(err) => Some(err),
            _ => None,
        }
    }
}

// Conversions from common error types
impl From<std::io::Error> for BackhaulError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for BackhaulError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err)
    }
}

impl From<sqlx::Error> for BackhaulError {
    fn from(err: sqlx::Error) -> Self {
        Self::Sqlx(err)
    }
}

impl From<String> for BackhaulError {
    fn from(msg: String) -> Self {
        Self::Other(msg)
    }
}

impl From<&str> for BackhaulError {
    fn from(msg: &str) -> Self {
        Self::Other(msg.to_string())
    }
}

//! Error types for docwire
//!
//! Provides a unified error type for all driver operations.

use bson::Document;
use thiserror::Error;

use crate::bulk::BulkWriteResult;

/// Result type alias using DocwireError
pub type Result<T> = std::result::Result<T, DocwireError>;

/// Unified error type for docwire operations
#[derive(Debug, Error)]
pub enum DocwireError {
    // -------------------------------------------------------------------------
    // Connection Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    // -------------------------------------------------------------------------
    // Protocol / Command Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Command failed: {0}")]
    Command(CommandFailure),

    #[error("Bulk write failed with {} error(s)", .0.write_errors.len())]
    BulkWrite(Box<BulkWriteResult>),

    #[error("Bulk write aborted: {source}")]
    BulkAborted {
        partial: Box<BulkWriteResult>,
        #[source]
        source: Box<DocwireError>,
    },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(#[from] bson::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] bson::de::Error),

    // -------------------------------------------------------------------------
    // Validation Errors
    // -------------------------------------------------------------------------
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // State Errors
    // -------------------------------------------------------------------------
    #[error("Cursor is closed")]
    CursorClosed,

    #[error("Session is closed")]
    SessionClosed,
}

impl DocwireError {
    /// Whether this error means the connection itself is unusable
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DocwireError::Io(_) | DocwireError::Connection(_) | DocwireError::Timeout(_)
        )
    }

    /// Server error code, if this is a command failure
    pub fn code(&self) -> Option<i32> {
        match self {
            DocwireError::Command(failure) => Some(failure.code),
            _ => None,
        }
    }
}

/// A well-formed server reply that rejected the command (`ok: 0`)
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFailure {
    /// Machine-readable error code
    pub code: i32,

    /// Symbolic code name, when the server sends one
    pub code_name: Option<String>,

    /// Human-readable message
    pub message: String,
}

impl CommandFailure {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            code_name: None,
            message: message.into(),
        }
    }

    /// Build a failure from a reply document carrying `ok: 0`
    pub fn from_reply(reply: &Document) -> Self {
        let code = reply
            .get("code")
            .and_then(crate::protocol::bson_as_i64)
            .unwrap_or(0) as i32;
        let message = reply
            .get_str("errmsg")
            .or_else(|_| reply.get_str("err"))
            .unwrap_or("unknown server error")
            .to_string();
        let code_name = reply.get_str("codeName").ok().map(str::to_string);

        Self {
            code,
            code_name,
            message,
        }
    }
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code_name {
            Some(name) => write!(f, "{} ({} {})", self.message, self.code, name),
            None => write!(f, "{} ({})", self.message, self.code),
        }
    }
}

//! Error types for the sett coordination layer.
//!
//! Every failure path in this crate returns a typed `SettError`; nothing
//! panics or aborts the process. Connectivity and protocol errors are
//! returned to the immediate caller for a decision; registry errors are
//! absorbed at the store boundary where the operation is documented to
//! fail softly.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the sett library.
#[derive(Debug, Error)]
pub enum SettError {
    // Wire protocol errors (fatal to the connection they occur on)
    #[error("IPC frame of {len} bytes exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("IPC protocol violation: {message}")]
    Protocol { message: String },

    // Dispatch errors (non-fatal, returned over the live connection)
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    // Connectivity loss. Carries the last-known owner so the host can
    // decide whether to attempt promotion.
    #[error("Lost connection to shared instance (PID {pid} on port {port})")]
    SharedInstanceLost { pid: u32, port: u16 },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    // Election
    #[error("Primary election failed after {attempts} attempts")]
    ElectionFailed { attempts: u32 },

    // Registry / database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for sett operations.
pub type Result<T> = std::result::Result<T, SettError>;

impl From<std::io::Error> for SettError {
    fn from(err: std::io::Error) -> Self {
        SettError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SettError {
    fn from(err: serde_json::Error) -> Self {
        SettError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for SettError {
    fn from(err: rusqlite::Error) -> Self {
        SettError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl SettError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        SettError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Connectivity loss / timeout
    /// - -32002: Election failure
    /// - -32005: Validation error
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            SettError::FrameTooLarge { .. } | SettError::Protocol { .. } => -32700,

            SettError::MethodNotFound { .. } => -32601,

            SettError::InvalidParams { .. } => -32602,

            SettError::SharedInstanceLost { .. } | SettError::Timeout(_) => -32000,

            SettError::ElectionFailed { .. } => -32002,

            SettError::Validation { .. } => -32005,

            // All other errors are internal errors
            _ => -32603,
        }
    }

    /// True for connection-loss class errors that should trigger the host's
    /// promotion logic.
    pub fn is_owner_lost(&self) -> bool {
        matches!(self, SettError::SharedInstanceLost { .. })
    }
}

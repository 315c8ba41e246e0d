//! Error types for the PowerJob worker.

use std::net::SocketAddr;

/// Top-level error type for the worker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Server API error: {0}")]
    ServerApi(#[from] ServerApiError),

    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),

    #[error("Failed to bind worker listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Instance storage errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Instance {instance_id} not found")]
    NotFound { instance_id: i64 },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Errors talking to the scheduling server.
#[derive(Debug, thiserror::Error)]
pub enum ServerApiError {
    #[error("Request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    #[error("Server rejected {operation}: {message}")]
    Rejected { operation: String, message: String },

    #[error("Invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },
}

/// Result code stored when an instance names a processor nobody registered.
pub const PROCESSOR_NOT_FOUND_CODE: i32 = -1;

/// Processor execution errors.
///
/// Every variant maps to the numeric result code persisted on the instance
/// record, see [`ProcessorError::code`].
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("processor not found")]
    NotFound { key: String },

    #[error("processor task key must not be empty")]
    EmptyKey,

    #[error("canceled")]
    Canceled,

    #[error("invalid job params: {reason}")]
    InvalidParams { reason: String },

    #[error("{reason}")]
    Failed { code: i32, reason: String },
}

impl ProcessorError {
    /// Numeric result code recorded for this failure.
    pub fn code(&self) -> i32 {
        match self {
            Self::Failed { code, .. } => *code,
            Self::NotFound { .. } => PROCESSOR_NOT_FOUND_CODE,
            Self::EmptyKey | Self::Canceled | Self::InvalidParams { .. } => -1,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Result type alias for the worker.
pub type Result<T> = std::result::Result<T, Error>;

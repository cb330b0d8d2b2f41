//! Core error types for telemetry-core.
//!
//! This module defines the error hierarchy using thiserror. Nothing in the
//! library panics on these; callers decide whether a failure skips the
//! current cycle or purges state.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for telemetry-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Persistent store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Network errors from the referral or stats services
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configured endpoint is not a valid URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Key-value store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open the backing database
    #[error("Failed to open store at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query or transaction failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Store is locked by another connection
    #[error("Store is locked")]
    Locked,

    /// A persisted value exists but cannot be decoded as the requested type
    #[error("Malformed value for '{key}': {message}")]
    Malformed { key: String, message: String },

    /// A value could not be encoded for storage
    #[error("Failed to encode value for '{key}': {message}")]
    Encode { key: String, message: String },
}

/// Errors returned by a [`crate::network::NetworkClient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The referral service has no record of the download id
    #[error("download id not found")]
    DownloadIdNotFound,

    /// Server answered with a non-success status
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Connection, timeout or TLS failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl NetworkError {
    /// Whether the next scheduled attempt may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, NetworkError::DownloadIdNotFound)
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Missing required configuration key
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked
                    || err.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            NetworkError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            NetworkError::Status(status.as_u16())
        } else {
            NetworkError::Transport(err.to_string())
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_download_id_not_found_is_terminal() {
        assert!(!NetworkError::DownloadIdNotFound.is_transient());
        assert!(NetworkError::Status(503).is_transient());
        assert!(NetworkError::Transport("reset".into()).is_transient());
        assert!(NetworkError::Decode("eof".into()).is_transient());
    }

    #[test]
    fn store_error_wraps_into_core_error() {
        let err: CoreError = StoreError::Malformed {
            key: "dau.last_launch_info".into(),
            message: "expected 3 elements".into(),
        }
        .into();
        assert!(err.to_string().contains("dau.last_launch_info"));
    }
}

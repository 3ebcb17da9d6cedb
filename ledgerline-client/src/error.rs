//! Error types for the client crate.
//!
//! Data-access operations return [`ApiError`]; [`ClientError`] covers setup
//! (configuration, storage, HTTP client construction) and the CLI.

use ledgerline_core::{ApiError, RecordError};
use ledgerline_storage::StorageError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
    #[error("Failed to initialise logging: {0}")]
    Telemetry(String),
    #[error("Usage: {0}")]
    Usage(String),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A local store failure surfaced through the data-access boundary.
pub(crate) fn local_storage_error(error: StorageError) -> ApiError {
    ApiError::unknown(format!("Local storage failed: {}", error)).with_code("LOCAL_STORAGE")
}

/// A record that could not be built from a payload or a remote row.
pub(crate) fn record_error(error: RecordError) -> ApiError {
    match error {
        RecordError::NotAnObject => ApiError::validation("Record payload must be a JSON object"),
        other => ApiError::unknown(other.to_string()).with_code("DECODE"),
    }
}

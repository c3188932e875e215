use serde::Serialize;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiskWatchError>;

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiskWatchError {
    /// The event-subscription or query service could not be reached or started.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Caller-supplied timing parameters are out of range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A single attribute query or association walk failed.
    /// Absorbed by the resolver and volume mapper, never surfaced by the engine.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    JsonError(String),
}

impl DiskWatchError {
    pub fn io(err: io::Error) -> Self {
        DiskWatchError::Io(err.to_string())
    }

    /// Promotes any failure to a provider-level failure, keeping the message.
    pub fn into_provider_failure(self) -> Self {
        match self {
            DiskWatchError::ProviderUnavailable(msg) => DiskWatchError::ProviderUnavailable(msg),
            other => DiskWatchError::ProviderUnavailable(other.to_string()),
        }
    }
}

impl From<io::Error> for DiskWatchError {
    fn from(err: io::Error) -> Self {
        DiskWatchError::io(err)
    }
}

impl From<serde_json::Error> for DiskWatchError {
    fn from(err: serde_json::Error) -> Self {
        DiskWatchError::JsonError(err.to_string())
    }
}

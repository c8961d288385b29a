use std::time::Duration;

use thiserror::Error;

use crate::storage::StorageError;

/// Connection-level failures. `Clone` so every caller that waited on a
/// shared connection attempt receives the same outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("store is not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("liveness probe failed: {0}")]
    ProbeFailed(String),
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("connection attempt cancelled by disconnect")]
    Cancelled,
    #[error("connection failed after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: Box<ConnectionError>,
    },
}

impl From<StorageError> for ConnectionError {
    fn from(error: StorageError) -> Self {
        ConnectionError::Transport(error.to_string())
    }
}

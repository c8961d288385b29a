use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("account {0} not found")]
    AccountNotFound(String),
    #[error("quota store unavailable: {0}")]
    Unavailable(#[from] ConnectionError),
    #[error("quota store {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("storage error: {0}")]
    StorageError(StorageError),
}

impl From<StorageError> for QuotaError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::AccountNotFound(account_id) => QuotaError::AccountNotFound(account_id),
            other => QuotaError::StorageError(other),
        }
    }
}

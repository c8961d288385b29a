use std::io;

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("account {0} not found")]
    AccountNotFound(String),
    #[error("invalid quota value: {0}")]
    InvalidQuotaValue(String),
    #[error("store handle is closed")]
    Closed,
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
}

impl StorageError {
    /// True when the failure means the store itself is gone rather than a
    /// single statement failing.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            StorageError::Closed | StorageError::IoError(_) => true,
            StorageError::DatabaseError(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::SystemIoFailure
                    | ErrorCode::CannotOpen
                    | ErrorCode::NotADatabase
                    | ErrorCode::DatabaseCorrupt
            ),
            _ => false,
        }
    }
}

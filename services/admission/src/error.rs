use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::quota::QuotaError;

/// Outcome kinds surfaced to the request pipeline. Denials and
/// infrastructure failures are separate variants so callers never mistake an
/// outage for a quota problem.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("too many requests for {key}")]
    RateLimited {
        key: String,
        retry_after: Option<Duration>,
    },
    #[error("request limit exceeded for {account_id}: used {used}/{limit}")]
    QuotaExceeded {
        account_id: String,
        used: u64,
        limit: u64,
    },
    #[error("account {0} not found")]
    AccountNotFound(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("store connection failed: {0}")]
    ConnectionFailed(ConnectionError),
    #[error("gated work failed: {0}")]
    WorkFailed(#[source] anyhow::Error),
}

impl AdmissionError {
    pub fn kind(&self) -> &'static str {
        match self {
            AdmissionError::RateLimited { .. } => "rate_limited",
            AdmissionError::QuotaExceeded { .. } => "quota_exceeded",
            AdmissionError::AccountNotFound(_) => "account_not_found",
            AdmissionError::StoreUnavailable(_) => "store_unavailable",
            AdmissionError::ConnectionFailed(_) => "connection_failed",
            AdmissionError::WorkFailed(_) => "work_failed",
        }
    }

    /// Whether retrying later without any administrative change can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdmissionError::RateLimited { .. }
                | AdmissionError::StoreUnavailable(_)
                | AdmissionError::ConnectionFailed(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AdmissionError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status class a caller should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            AdmissionError::RateLimited { .. } | AdmissionError::QuotaExceeded { .. } => 429,
            AdmissionError::AccountNotFound(_) => 404,
            AdmissionError::StoreUnavailable(_) | AdmissionError::ConnectionFailed(_) => 503,
            AdmissionError::WorkFailed(_) => 500,
        }
    }
}

impl From<QuotaError> for AdmissionError {
    fn from(error: QuotaError) -> Self {
        match error {
            QuotaError::AccountNotFound(account_id) => AdmissionError::AccountNotFound(account_id),
            QuotaError::Unavailable(err @ ConnectionError::Exhausted { .. }) => {
                AdmissionError::ConnectionFailed(err)
            }
            QuotaError::Unavailable(err) => AdmissionError::StoreUnavailable(err.to_string()),
            err @ QuotaError::Timeout { .. } => AdmissionError::StoreUnavailable(err.to_string()),
            QuotaError::StorageError(err) => AdmissionError::StoreUnavailable(err.to_string()),
        }
    }
}

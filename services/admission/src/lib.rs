pub mod config;
pub mod connection;
pub mod error;
pub mod limiter;
pub mod pipeline;
pub mod quota;
pub mod storage;

pub use config::{AdmissionConfig, QuotaEnforcement};
pub use connection::{
    ConnectionError, ConnectionManager, ConnectionStatus, Connector, RetryPolicy, SqliteConnector,
    StoreHandle, StoreLease,
};
pub use error::AdmissionError;
pub use limiter::{ActionClass, RateLimitKey, WindowLimiter, WindowRule, WindowRules};
pub use pipeline::AdmissionPipeline;
pub use quota::{QuotaDecision, QuotaError, QuotaGate, UsageReport};
pub use storage::{AccountDatabase, AccountQuota, StorageError};

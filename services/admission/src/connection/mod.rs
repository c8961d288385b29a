pub mod connector;
pub mod error;
pub mod manager;
pub mod retry;

pub use connector::{Connector, SqliteConnector, StoreHandle, StoreLease};
pub use error::ConnectionError;
pub use manager::{ConnectionManager, ConnectionStatus};
pub use retry::{RetryPolicy, RetrySchedule, RetryStep};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5_000;

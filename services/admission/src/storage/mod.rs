pub mod database;
pub mod error;
pub mod schema;

pub use database::{AccountDatabase, AccountQuota, ConsumeOutcome};
pub use error::StorageError;

pub const ACCOUNTS_DB_FILENAME: &str = "accounts.db";

pub mod error;
pub mod gate;
pub mod report;

pub use error::QuotaError;
pub use gate::{QuotaDecision, QuotaGate};
pub use report::UsageReport;

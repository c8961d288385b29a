pub mod policy;
pub mod window;

pub use policy::{ActionClass, RateLimitKey, WindowRule, WindowRules};
pub use window::{WindowEntry, WindowLimiter};

pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// Longest window a rule may configure; longer windows are clamped to it.
pub const MAX_WINDOW: std::time::Duration = std::time::Duration::from_secs(366 * 24 * 60 * 60);

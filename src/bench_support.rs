use std::sync::Arc;
use std::time::Duration;

use chat_admission::{
    AdmissionPipeline, ConnectionManager, QuotaEnforcement, QuotaGate, RetryPolicy,
    SqliteConnector, WindowLimiter, WindowRule, WindowRules,
};
use tempfile::TempDir;
use tokio::runtime::Runtime;

pub use chat_admission;

/// Limit large enough that benchmark loops never hit a quota denial.
pub const BENCH_REQUEST_LIMIT: u64 = 1_000_000_000;

pub struct AdmissionBenchFixture {
    pub gate: Arc<QuotaGate>,
    pub pipeline: Arc<AdmissionPipeline>,
    pub account_ids: Vec<String>,
    pub temp_dir: TempDir,
}

impl AdmissionBenchFixture {
    /// Opens a file-backed store in a temp dir and provisions `accounts`
    /// accounts with an effectively unlimited quota.
    pub fn new(runtime: &Runtime, accounts: usize) -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let connector = SqliteConnector::new(
            temp_dir.path().join("accounts.db"),
            Duration::from_secs(5),
        );
        let manager = Arc::new(ConnectionManager::new(
            connector,
            RetryPolicy::default(),
            Duration::from_secs(5),
        ));
        let gate = Arc::new(QuotaGate::new(manager, Duration::from_secs(5), BENCH_REQUEST_LIMIT));

        let account_ids: Vec<String> = (0..accounts)
            .map(|i| format!("bench-account-{i}"))
            .collect();
        runtime.block_on(async {
            gate.connection().connect().await?;
            for account_id in &account_ids {
                gate.provision_account(account_id).await?;
                gate.set_limit(account_id, BENCH_REQUEST_LIMIT).await?;
            }
            anyhow::Ok(())
        })?;

        let rules = WindowRules {
            chat: unlimited_window(),
            ..WindowRules::default()
        };
        let pipeline = Arc::new(AdmissionPipeline::new(
            WindowLimiter::new(),
            Arc::clone(&gate),
            rules,
            QuotaEnforcement::Deferred,
        ));

        Ok(Self {
            gate,
            pipeline,
            account_ids,
            temp_dir,
        })
    }
}

pub fn unlimited_window() -> WindowRule {
    WindowRule::new(u32::MAX, Duration::from_secs(60))
}

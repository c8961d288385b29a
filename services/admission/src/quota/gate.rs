use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionError, ConnectionManager, Connector, SqliteConnector};
use crate::storage::{AccountDatabase, AccountQuota, ConsumeOutcome, StorageError};

use super::error::QuotaError;
use super::report::UsageReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum QuotaDecision {
    Allowed { used: u64, limit: u64 },
    Denied { used: u64, limit: u64 },
}

impl QuotaDecision {
    fn from_quota(quota: &AccountQuota) -> Self {
        if quota.is_exhausted() {
            QuotaDecision::Denied {
                used: quota.requests_used,
                limit: quota.requests_limit,
            }
        } else {
            QuotaDecision::Allowed {
                used: quota.requests_used,
                limit: quota.requests_limit,
            }
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed { .. })
    }

    pub fn used(&self) -> u64 {
        match self {
            QuotaDecision::Allowed { used, .. } | QuotaDecision::Denied { used, .. } => *used,
        }
    }

    pub fn limit(&self) -> u64 {
        match self {
            QuotaDecision::Allowed { limit, .. } | QuotaDecision::Denied { limit, .. } => *limit,
        }
    }
}

/// Durable per-account request quota.
///
/// Every call goes through the connection manager: it connects on demand and
/// fails closed with [`QuotaError::Unavailable`] when the store cannot be
/// reached, so an outage is never reported as a denial.
pub struct QuotaGate<C = SqliteConnector>
where
    C: Connector<Handle = AccountDatabase>,
{
    connection: Arc<ConnectionManager<C>>,
    operation_timeout: Duration,
    default_limit: u64,
    invariant_violations: AtomicU64,
}

impl<C> QuotaGate<C>
where
    C: Connector<Handle = AccountDatabase>,
{
    pub fn new(
        connection: Arc<ConnectionManager<C>>,
        operation_timeout: Duration,
        default_limit: u64,
    ) -> Self {
        Self {
            connection,
            operation_timeout,
            default_limit,
            invariant_violations: AtomicU64::new(0),
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager<C>> {
        &self.connection
    }

    /// Read-only admission check. Does not reserve anything; pair it with
    /// [`QuotaGate::commit`] once the gated work succeeded.
    pub async fn check_and_reserve(&self, account_id: &str) -> Result<QuotaDecision, QuotaError> {
        let quota = self.get_quota(account_id).await?;
        let decision = QuotaDecision::from_quota(&quota);

        if !decision.is_allowed() {
            info!(
                account_id,
                used = quota.requests_used,
                limit = quota.requests_limit,
                "request quota exhausted"
            );
        }
        Ok(decision)
    }

    /// Adds exactly one request to the account's usage. Returns false when
    /// the account does not exist.
    pub async fn commit(&self, account_id: &str) -> Result<bool, QuotaError> {
        let id = account_id.to_string();
        let updated = self
            .run_store("commit", move |db| db.increment_used(&id))
            .await?;

        match updated {
            Some(quota) => {
                if quota.is_overrun() {
                    self.invariant_violations.fetch_add(1, Ordering::Relaxed);
                    error!(
                        account_id,
                        used = quota.requests_used,
                        limit = quota.requests_limit,
                        "request usage exceeds limit after commit"
                    );
                } else {
                    debug!(account_id, used = quota.requests_used, "committed request usage");
                }
                Ok(true)
            }
            None => {
                warn!(account_id, "commit for unknown account");
                Ok(false)
            }
        }
    }

    /// Check and increment as one conditional update; the slot is consumed
    /// only when the decision is `Allowed`.
    pub async fn try_reserve(&self, account_id: &str) -> Result<QuotaDecision, QuotaError> {
        let id = account_id.to_string();
        let outcome = self
            .run_store("reserve", move |db| db.try_consume(&id))
            .await?;

        Ok(match outcome {
            ConsumeOutcome::Consumed(quota) => QuotaDecision::Allowed {
                used: quota.requests_used,
                limit: quota.requests_limit,
            },
            ConsumeOutcome::Exhausted(quota) => {
                info!(
                    account_id,
                    used = quota.requests_used,
                    limit = quota.requests_limit,
                    "request quota exhausted"
                );
                QuotaDecision::Denied {
                    used: quota.requests_used,
                    limit: quota.requests_limit,
                }
            }
        })
    }

    /// Administrative override; applies to the next check.
    pub async fn set_limit(&self, account_id: &str, new_limit: u64) -> Result<bool, QuotaError> {
        let id = account_id.to_string();
        let updated = self
            .run_store("set_limit", move |db| db.set_limit(&id, new_limit))
            .await?;

        if updated {
            info!(account_id, new_limit, "updated request limit");
        } else {
            warn!(account_id, new_limit, "request limit update for unknown account");
        }
        Ok(updated)
    }

    /// Administrative reset of the usage counter.
    pub async fn reset_usage(&self, account_id: &str) -> Result<bool, QuotaError> {
        let id = account_id.to_string();
        let reset = self
            .run_store("reset_usage", move |db| db.reset_usage(&id))
            .await?;

        if reset {
            info!(account_id, "reset request usage");
        }
        Ok(reset)
    }

    pub async fn provision_account(&self, account_id: &str) -> Result<AccountQuota, QuotaError> {
        let id = account_id.to_string();
        let default_limit = self.default_limit;
        self.run_store("provision", move |db| db.provision_account(&id, default_limit))
            .await
    }

    pub async fn get_quota(&self, account_id: &str) -> Result<AccountQuota, QuotaError> {
        let id = account_id.to_string();
        self.run_store("get_quota", move |db| db.get_quota(&id))
            .await?
            .ok_or_else(|| QuotaError::AccountNotFound(account_id.to_string()))
    }

    pub async fn usage(&self, account_id: &str) -> Result<UsageReport, QuotaError> {
        let quota = self.get_quota(account_id).await?;
        Ok(UsageReport::from(&quota))
    }

    pub async fn list_quotas(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<AccountQuota>, QuotaError> {
        self.run_store("list_quotas", move |db| db.list_quotas(limit, offset))
            .await
    }

    pub async fn count_accounts(&self) -> Result<u64, QuotaError> {
        self.run_store("count_accounts", |db| db.count_accounts()).await
    }

    /// Applies configured per-account limits. Unknown accounts are skipped.
    pub async fn apply_limit_overrides(
        &self,
        overrides: &BTreeMap<String, u64>,
    ) -> Result<usize, QuotaError> {
        let mut applied = 0usize;
        for (account_id, limit) in overrides {
            let current = match self.get_quota(account_id).await {
                Ok(quota) => quota,
                Err(QuotaError::AccountNotFound(_)) => {
                    debug!(account_id = %account_id, "limit override for unknown account skipped");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if current.requests_limit == *limit {
                continue;
            }
            if self.set_limit(account_id, *limit).await? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Commits observed to push usage past the limit.
    pub fn invariant_violations(&self) -> u64 {
        self.invariant_violations.load(Ordering::Relaxed)
    }

    async fn run_store<T, F>(&self, operation: &'static str, f: F) -> Result<T, QuotaError>
    where
        T: Send + 'static,
        F: FnOnce(&AccountDatabase) -> Result<T, StorageError> + Send + 'static,
    {
        self.connection.connect().await?;
        let lease = self.connection.database()?;

        let joined = timeout(self.operation_timeout, task::spawn_blocking(move || f(&*lease)))
            .await
            .map_err(|_| {
                warn!(operation, timeout = ?self.operation_timeout, "quota store call timed out");
                QuotaError::Timeout {
                    operation,
                    timeout: self.operation_timeout,
                }
            })?;

        let result = joined.map_err(|err| {
            QuotaError::Unavailable(ConnectionError::Transport(err.to_string()))
        })?;

        match result {
            Ok(value) => Ok(value),
            Err(err) if err.is_connection_lost() => {
                let reason = err.to_string();
                self.connection.mark_lost(&reason).await;
                Err(QuotaError::Unavailable(ConnectionError::Transport(reason)))
            }
            Err(err) => Err(err.into()),
        }
    }
}

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{AdmissionConfig, QuotaEnforcement};
use crate::connection::{Connector, SqliteConnector};
use crate::error::AdmissionError;
use crate::limiter::{ActionClass, RateLimitKey, WindowLimiter, WindowRules};
use crate::quota::{QuotaDecision, QuotaGate};
use crate::storage::AccountDatabase;

/// Runs a request through the window limiter, then the quota gate, then the
/// caller's work. The limiter does no I/O, so a window denial never reaches
/// the store.
pub struct AdmissionPipeline<C = SqliteConnector>
where
    C: Connector<Handle = AccountDatabase>,
{
    limiter: WindowLimiter,
    quota: Arc<QuotaGate<C>>,
    rules: WindowRules,
    enforcement: QuotaEnforcement,
}

impl<C> AdmissionPipeline<C>
where
    C: Connector<Handle = AccountDatabase>,
{
    pub fn new(
        limiter: WindowLimiter,
        quota: Arc<QuotaGate<C>>,
        rules: WindowRules,
        enforcement: QuotaEnforcement,
    ) -> Self {
        Self {
            limiter,
            quota,
            rules,
            enforcement,
        }
    }

    pub fn from_config(
        limiter: WindowLimiter,
        quota: Arc<QuotaGate<C>>,
        config: &AdmissionConfig,
    ) -> Self {
        Self::new(
            limiter,
            quota,
            config.window_rules.clone(),
            config.quota_enforcement,
        )
    }

    pub fn limiter(&self) -> &WindowLimiter {
        &self.limiter
    }

    pub fn quota(&self) -> &Arc<QuotaGate<C>> {
        &self.quota
    }

    /// Window check alone, for actions without an account (login and
    /// registration keyed by client address).
    pub fn admit(&self, action: ActionClass, identity: &str) -> Result<(), AdmissionError> {
        let rule = self.rules.for_action(action);
        let key = RateLimitKey::new(action, identity);

        if self.limiter.admit(key.as_str(), rule.max_attempts, rule.window) {
            return Ok(());
        }

        let retry_after = self.limiter.retry_after(key.as_str());
        warn!(key = %key, ?retry_after, "rate limit window exhausted");
        Err(AdmissionError::RateLimited {
            key: key.to_string(),
            retry_after,
        })
    }

    /// Full admission for account-scoped work. Usage is counted only for
    /// work that succeeded in deferred mode; strict mode counts at
    /// reservation time.
    pub async fn run<T, F, Fut>(
        &self,
        action: ActionClass,
        account_id: &str,
        work: F,
    ) -> Result<T, AdmissionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let request_id = Uuid::new_v4();
        let span = info_span!("admission", %request_id, %action, account_id);

        async move {
            self.admit(action, account_id)?;

            let decision = match self.enforcement {
                QuotaEnforcement::Deferred => self.quota.check_and_reserve(account_id).await?,
                QuotaEnforcement::Strict => self.quota.try_reserve(account_id).await?,
            };

            if let QuotaDecision::Denied { used, limit } = decision {
                return Err(AdmissionError::QuotaExceeded {
                    account_id: account_id.to_string(),
                    used,
                    limit,
                });
            }

            let output = work().await.map_err(AdmissionError::WorkFailed)?;

            if self.enforcement == QuotaEnforcement::Deferred {
                match self.quota.commit(account_id).await {
                    Ok(true) => debug!("request usage committed"),
                    Ok(false) => warn!("account vanished before usage commit"),
                    Err(err) => error!(error = %err, "work succeeded but usage commit failed"),
                }
            }

            Ok(output)
        }
        .instrument(span)
        .await
    }
}

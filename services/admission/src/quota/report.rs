use serde::{Deserialize, Serialize};

use crate::storage::AccountQuota;

/// Per-account usage summary surfaced to users ("used 7/10").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub account_id: String,
    pub requests_used: u64,
    pub requests_limit: u64,
    pub remaining_requests: u64,
    pub usage_percentage: u64,
}

impl From<&AccountQuota> for UsageReport {
    fn from(quota: &AccountQuota) -> Self {
        // a zero limit means nothing is left
        let usage_percentage = if quota.requests_limit == 0 {
            100
        } else {
            let used = quota.requests_used as u128 * 100;
            let limit = quota.requests_limit as u128;
            ((used + limit / 2) / limit) as u64
        };

        Self {
            account_id: quota.account_id.clone(),
            requests_used: quota.requests_used,
            requests_limit: quota.requests_limit,
            remaining_requests: quota.remaining(),
            usage_percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota(used: u64, limit: u64) -> AccountQuota {
        AccountQuota {
            account_id: "acct".to_string(),
            requests_used: used,
            requests_limit: limit,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_usage_percentage_rounds() {
        assert_eq!(UsageReport::from(&quota(1, 3)).usage_percentage, 33);
        assert_eq!(UsageReport::from(&quota(2, 3)).usage_percentage, 67);
        assert_eq!(UsageReport::from(&quota(10, 10)).usage_percentage, 100);
        assert_eq!(UsageReport::from(&quota(0, 0)).usage_percentage, 100);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = UsageReport::from(&quota(7, 10));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["requestsUsed"], 7);
        assert_eq!(json["requestsLimit"], 10);
        assert_eq!(json["remainingRequests"], 3);
        assert_eq!(json["usagePercentage"], 70);
    }
}

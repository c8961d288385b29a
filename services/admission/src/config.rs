use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::connection::RetryPolicy;
use crate::limiter::{WindowRule, WindowRules, DEFAULT_CLEANUP_INTERVAL_SECS, MAX_WINDOW};
use crate::storage::ACCOUNTS_DB_FILENAME;

/// How the quota gate counts a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaEnforcement {
    /// Read-only check before the work, unconditional increment after it
    /// succeeds. Concurrent requests at the boundary may overrun slightly.
    Deferred,
    /// Conditional increment before the work; never overruns, but failed
    /// work still consumes its slot.
    Strict,
}

impl FromStr for QuotaEnforcement {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "deferred" => Ok(QuotaEnforcement::Deferred),
            "strict" => Ok(QuotaEnforcement::Strict),
            other => anyhow::bail!("unknown quota enforcement mode {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Directory holding the account store
    pub data_dir: PathBuf,

    /// Bound on a single transport open or liveness probe
    pub connect_timeout_ms: u64,

    /// Bound on a single store read or write
    pub operation_timeout_ms: u64,

    /// Connection attempts before giving up
    pub max_retries: u32,

    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter: f64,

    pub health_check_interval_secs: u64,
    pub cleanup_interval_secs: u64,

    /// Limit given to newly provisioned accounts
    pub default_requests_limit: u64,

    /// Per-account limits enforced at startup
    pub limit_overrides: BTreeMap<String, u64>,

    pub quota_enforcement: QuotaEnforcement,
    pub window_rules: WindowRules,
    pub log_level: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/admission"),
            connect_timeout_ms: 10_000,
            operation_timeout_ms: 5_000,
            max_retries: crate::connection::DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: crate::connection::DEFAULT_BASE_DELAY_MS,
            retry_max_delay_ms: crate::connection::DEFAULT_MAX_DELAY_MS,
            retry_jitter: 0.0,
            health_check_interval_secs: 30,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            default_requests_limit: 10,
            limit_overrides: BTreeMap::new(),
            quota_enforcement: QuotaEnforcement::Deferred,
            window_rules: WindowRules::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AdmissionConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(dir) = env::var("ADMISSION_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(value) = parse_var("DB_CONNECT_TIMEOUT_MS")? {
            cfg.connect_timeout_ms = value;
        }
        if let Some(value) = parse_var("DB_OPERATION_TIMEOUT_MS")? {
            cfg.operation_timeout_ms = value;
        }
        if let Some(value) = parse_var("DB_MAX_RETRIES")? {
            cfg.max_retries = value;
        }
        if let Some(value) = parse_var("DB_RETRY_BASE_DELAY_MS")? {
            cfg.retry_base_delay_ms = value;
        }
        if let Some(value) = parse_var("DB_RETRY_MAX_DELAY_MS")? {
            cfg.retry_max_delay_ms = value;
        }
        if let Some(value) = parse_var("DB_RETRY_JITTER")? {
            cfg.retry_jitter = value;
        }
        if let Some(value) = parse_var("HEALTH_CHECK_INTERVAL_SECS")? {
            cfg.health_check_interval_secs = value;
        }
        if let Some(value) = parse_var("LIMITER_CLEANUP_INTERVAL_SECS")? {
            cfg.cleanup_interval_secs = value;
        }
        if let Some(value) = parse_var("DEFAULT_REQUESTS_LIMIT")? {
            cfg.default_requests_limit = value;
        }
        if let Ok(raw) = env::var("QUOTA_LIMIT_OVERRIDES") {
            cfg.limit_overrides = parse_limit_overrides(&raw)
                .with_context(|| format!("QUOTA_LIMIT_OVERRIDES is invalid: {raw}"))?;
        }
        if let Some(mode) = parse_var("QUOTA_ENFORCEMENT")? {
            cfg.quota_enforcement = mode;
        }

        override_rule(&mut cfg.window_rules.login, "LOGIN_MAX_ATTEMPTS", "LOGIN_WINDOW_SECS")?;
        override_rule(
            &mut cfg.window_rules.register,
            "REGISTER_MAX_ATTEMPTS",
            "REGISTER_WINDOW_SECS",
        )?;
        override_rule(&mut cfg.window_rules.chat, "RATE_LIMIT_PER_MINUTE", "CHAT_WINDOW_SECS")?;

        if let Ok(level) = env::var("LOG_LEVEL") {
            cfg.log_level = level;
        }

        cfg.validate()?;
        ensure_directory(&cfg.data_dir)?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            anyhow::bail!("DB_CONNECT_TIMEOUT_MS must be greater than zero");
        }
        if self.operation_timeout_ms == 0 {
            anyhow::bail!("DB_OPERATION_TIMEOUT_MS must be greater than zero");
        }
        if self.max_retries == 0 {
            anyhow::bail!("DB_MAX_RETRIES must be greater than zero");
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            anyhow::bail!("DB_RETRY_BASE_DELAY_MS must not exceed DB_RETRY_MAX_DELAY_MS");
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            anyhow::bail!("DB_RETRY_JITTER must be between 0.0 and 1.0");
        }
        if self.health_check_interval_secs == 0 {
            anyhow::bail!("HEALTH_CHECK_INTERVAL_SECS must be greater than zero");
        }
        if self.cleanup_interval_secs == 0 {
            anyhow::bail!("LIMITER_CLEANUP_INTERVAL_SECS must be greater than zero");
        }
        if self.default_requests_limit == 0 {
            anyhow::bail!("DEFAULT_REQUESTS_LIMIT must be greater than zero");
        }

        for (name, rule) in [
            ("login", self.window_rules.login),
            ("register", self.window_rules.register),
            ("chat", self.window_rules.chat),
        ] {
            if rule.max_attempts == 0 {
                anyhow::bail!("{name} window must allow at least one attempt");
            }
            if rule.window.is_zero() {
                anyhow::bail!("{name} window duration must be greater than zero");
            }
            if rule.window > MAX_WINDOW {
                anyhow::bail!(
                    "{name} window duration must not exceed {} seconds",
                    MAX_WINDOW.as_secs()
                );
            }
        }

        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(ACCOUNTS_DB_FILENAME)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: self.retry_jitter,
        }
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{name} is invalid ({raw}): {err}")),
        Err(_) => Ok(None),
    }
}

fn override_rule(rule: &mut WindowRule, attempts_var: &str, window_var: &str) -> Result<()> {
    if let Some(max_attempts) = parse_var(attempts_var)? {
        rule.max_attempts = max_attempts;
    }
    if let Some(secs) = parse_var::<u64>(window_var)? {
        rule.window = Duration::from_secs(secs);
    }
    Ok(())
}

/// Parses `account=limit` pairs separated by commas.
pub fn parse_limit_overrides(raw: &str) -> Result<BTreeMap<String, u64>> {
    let mut overrides = BTreeMap::new();

    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let (account, limit) = pair
            .split_once('=')
            .with_context(|| format!("expected account=limit, got {pair}"))?;
        let account = account.trim();
        if account.is_empty() {
            anyhow::bail!("empty account id in {pair}");
        }
        let limit = limit
            .trim()
            .parse::<u64>()
            .with_context(|| format!("limit for {account} must be a non-negative integer"))?;
        overrides.insert(account.to_string(), limit);
    }

    Ok(overrides)
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("{} exists but is not a directory", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("unable to create data directory {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AdmissionConfig::default();
        assert!(config.validate().is_ok());

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(config.database_path(), PathBuf::from("data/admission/accounts.db"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = AdmissionConfig::default();

        config.max_retries = 0;
        assert!(config.validate().is_err());
        config.max_retries = 3;

        config.retry_base_delay_ms = 10_000;
        assert!(config.validate().is_err());
        config.retry_base_delay_ms = 1_000;

        config.retry_jitter = 1.5;
        assert!(config.validate().is_err());
        config.retry_jitter = 0.25;
        assert!(config.validate().is_ok());

        config.operation_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.operation_timeout_ms = 5_000;

        config.window_rules.chat.max_attempts = 0;
        assert!(config.validate().is_err());
        config.window_rules.chat.max_attempts = 10;

        config.window_rules.login.window = Duration::ZERO;
        assert!(config.validate().is_err());

        config.window_rules.login.window = Duration::from_secs(u64::MAX);
        assert!(config.validate().is_err());
        config.window_rules.login.window = MAX_WINDOW;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_limit_overrides() {
        let overrides = parse_limit_overrides(" 1752297695916=100, vip = 0 ,").unwrap();
        assert_eq!(overrides.get("1752297695916"), Some(&100));
        assert_eq!(overrides.get("vip"), Some(&0));
        assert_eq!(overrides.len(), 2);

        assert!(parse_limit_overrides("missing-limit").is_err());
        assert!(parse_limit_overrides("=5").is_err());
        assert!(parse_limit_overrides("acct=-1").is_err());
        assert!(parse_limit_overrides("").unwrap().is_empty());
    }

    #[test]
    fn test_quota_enforcement_from_str() {
        assert_eq!(
            "strict".parse::<QuotaEnforcement>().unwrap(),
            QuotaEnforcement::Strict
        );
        assert_eq!(
            "DEFERRED".parse::<QuotaEnforcement>().unwrap(),
            QuotaEnforcement::Deferred
        );
        assert!("eventual".parse::<QuotaEnforcement>().is_err());
    }
}

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::error::StorageError;
use super::schema::init_database;

const QUOTA_COLUMNS: &str = "account_id, requests_used, requests_limit, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountQuota {
    pub account_id: String,
    pub requests_used: u64,
    pub requests_limit: u64,
    pub created_at: String,
    pub updated_at: String,
}

impl AccountQuota {
    pub fn is_exhausted(&self) -> bool {
        self.requests_used >= self.requests_limit
    }

    pub fn remaining(&self) -> u64 {
        self.requests_limit.saturating_sub(self.requests_used)
    }

    pub fn is_overrun(&self) -> bool {
        self.requests_used > self.requests_limit
    }
}

/// Result of a conditional increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed(AccountQuota),
    Exhausted(AccountQuota),
}

/// SQLite-backed account quota store.
///
/// The connection lives behind a mutex; `close` takes it out, after which
/// every call reports [`StorageError::Closed`].
pub struct AccountDatabase {
    conn: Mutex<Option<Connection>>,
}

impl AccountDatabase {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        init_database(&conn)?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        init_database(&conn)?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn ping(&self) -> Result<(), StorageError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }

    pub(crate) fn close(&self) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        match guard.take() {
            Some(conn) => conn.close().map_err(|(_, err)| StorageError::from(err)),
            None => Ok(()),
        }
    }

    /// Inserts the account with `default_limit` unless it already exists,
    /// then returns the stored row.
    pub fn provision_account(
        &self,
        account_id: &str,
        default_limit: u64,
    ) -> Result<AccountQuota, StorageError> {
        let limit = to_sql_count(default_limit)?;
        let now = Utc::now().to_rfc3339();

        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO account_quotas
                    (account_id, requests_used, requests_limit, created_at, updated_at)
                VALUES (?1, 0, ?2, ?3, ?3)
                ON CONFLICT(account_id) DO NOTHING
                "#,
                params![account_id, limit, now],
            )?;
            select_quota(conn, account_id)?
                .ok_or_else(|| StorageError::AccountNotFound(account_id.to_string()))
        })
    }

    pub fn get_quota(&self, account_id: &str) -> Result<Option<AccountQuota>, StorageError> {
        self.with_conn(|conn| select_quota(conn, account_id))
    }

    /// Unconditional `requests_used + 1` in a single statement. Only the
    /// counter column is written.
    pub fn increment_used(&self, account_id: &str) -> Result<Option<AccountQuota>, StorageError> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE account_quotas SET requests_used = requests_used + 1 \
                 WHERE account_id = ?1 RETURNING {QUOTA_COLUMNS}"
            );
            let quota = conn
                .query_row(&sql, params![account_id], quota_from_row)
                .optional()?;
            Ok(quota)
        })
    }

    /// Increments only while `requests_used < requests_limit`.
    pub fn try_consume(&self, account_id: &str) -> Result<ConsumeOutcome, StorageError> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE account_quotas SET requests_used = requests_used + 1 \
                 WHERE account_id = ?1 AND requests_used < requests_limit \
                 RETURNING {QUOTA_COLUMNS}"
            );
            let consumed = conn
                .query_row(&sql, params![account_id], quota_from_row)
                .optional()?;

            match consumed {
                Some(quota) => Ok(ConsumeOutcome::Consumed(quota)),
                None => select_quota(conn, account_id)?
                    .map(ConsumeOutcome::Exhausted)
                    .ok_or_else(|| StorageError::AccountNotFound(account_id.to_string())),
            }
        })
    }

    pub fn set_limit(&self, account_id: &str, requests_limit: u64) -> Result<bool, StorageError> {
        let limit = to_sql_count(requests_limit)?;
        let now = Utc::now().to_rfc3339();

        self.with_conn(|conn| {
            let changed = conn.execute(
                r#"
                UPDATE account_quotas
                SET requests_limit = ?2, updated_at = ?3
                WHERE account_id = ?1
                "#,
                params![account_id, limit, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn reset_usage(&self, account_id: &str) -> Result<bool, StorageError> {
        let now = Utc::now().to_rfc3339();

        self.with_conn(|conn| {
            let changed = conn.execute(
                r#"
                UPDATE account_quotas
                SET requests_used = 0, updated_at = ?2
                WHERE account_id = ?1
                "#,
                params![account_id, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn list_quotas(&self, limit: u32, offset: u32) -> Result<Vec<AccountQuota>, StorageError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {QUOTA_COLUMNS} FROM account_quotas \
                 ORDER BY created_at DESC, account_id ASC LIMIT ?1 OFFSET ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![limit, offset], quota_from_row)?;

            let mut quotas = Vec::new();
            for row in rows {
                quotas.push(row?);
            }
            Ok(quotas)
        })
    }

    pub fn count_accounts(&self) -> Result<u64, StorageError> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM account_quotas", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;
        f(conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Closed)
    }
}

fn select_quota(conn: &Connection, account_id: &str) -> Result<Option<AccountQuota>, StorageError> {
    let sql = format!("SELECT {QUOTA_COLUMNS} FROM account_quotas WHERE account_id = ?1");
    let quota = conn
        .query_row(&sql, params![account_id], quota_from_row)
        .optional()?;
    Ok(quota)
}

fn quota_from_row(row: &Row<'_>) -> rusqlite::Result<AccountQuota> {
    Ok(AccountQuota {
        account_id: row.get(0)?,
        requests_used: row.get::<_, i64>(1)? as u64,
        requests_limit: row.get::<_, i64>(2)? as u64,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn to_sql_count(value: u64) -> Result<i64, StorageError> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidQuotaValue(format!("{value} does not fit the store")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> AccountDatabase {
        AccountDatabase::open_in_memory().expect("in-memory database")
    }

    #[test]
    fn test_provision_is_idempotent() {
        let db = database();
        let first = db.provision_account("acct-1", 10).unwrap();
        db.increment_used("acct-1").unwrap();

        let second = db.provision_account("acct-1", 50).unwrap();
        assert_eq!(first.requests_limit, 10);
        assert_eq!(second.requests_limit, 10);
        assert_eq!(second.requests_used, 1);
    }

    #[test]
    fn test_increment_touches_only_counter() {
        let db = database();
        let before = db.provision_account("acct-1", 10).unwrap();

        let after = db.increment_used("acct-1").unwrap().expect("account exists");
        assert_eq!(after.requests_used, before.requests_used + 1);
        assert_eq!(after.requests_limit, before.requests_limit);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[test]
    fn test_increment_unknown_account() {
        let db = database();
        assert!(db.increment_used("ghost").unwrap().is_none());
    }

    #[test]
    fn test_try_consume_stops_at_limit() {
        let db = database();
        db.provision_account("acct-1", 2).unwrap();

        for expected in 1..=2 {
            match db.try_consume("acct-1").unwrap() {
                ConsumeOutcome::Consumed(quota) => assert_eq!(quota.requests_used, expected),
                other => panic!("expected consumption, got {other:?}"),
            }
        }
        match db.try_consume("acct-1").unwrap() {
            ConsumeOutcome::Exhausted(quota) => {
                assert_eq!(quota.requests_used, 2);
                assert_eq!(quota.requests_limit, 2);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn test_try_consume_unknown_account() {
        let db = database();
        assert!(matches!(
            db.try_consume("ghost"),
            Err(StorageError::AccountNotFound(id)) if id == "ghost"
        ));
    }

    #[test]
    fn test_set_limit_and_reset() {
        let db = database();
        db.provision_account("acct-1", 10).unwrap();
        db.increment_used("acct-1").unwrap();

        assert!(db.set_limit("acct-1", 0).unwrap());
        assert!(db.get_quota("acct-1").unwrap().unwrap().is_exhausted());

        assert!(db.reset_usage("acct-1").unwrap());
        let quota = db.get_quota("acct-1").unwrap().unwrap();
        assert_eq!(quota.requests_used, 0);
        assert_eq!(quota.requests_limit, 0);

        assert!(!db.set_limit("ghost", 5).unwrap());
        assert!(!db.reset_usage("ghost").unwrap());
    }

    #[test]
    fn test_limit_out_of_range() {
        let db = database();
        db.provision_account("acct-1", 10).unwrap();
        assert!(matches!(
            db.set_limit("acct-1", u64::MAX),
            Err(StorageError::InvalidQuotaValue(_))
        ));
    }

    #[test]
    fn test_list_and_count() {
        let db = database();
        for id in ["a", "b", "c"] {
            db.provision_account(id, 10).unwrap();
        }

        assert_eq!(db.count_accounts().unwrap(), 3);
        assert_eq!(db.list_quotas(2, 0).unwrap().len(), 2);
        assert_eq!(db.list_quotas(10, 2).unwrap().len(), 1);
    }

    #[test]
    fn test_closed_handle_rejects_calls() {
        let db = database();
        db.ping().unwrap();
        db.close().unwrap();

        assert!(db.is_closed());
        let err = db.ping().unwrap_err();
        assert!(err.is_connection_lost());
        assert!(matches!(db.get_quota("acct-1"), Err(StorageError::Closed)));
        db.close().unwrap();
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("accounts.db");

        let db = AccountDatabase::open(&path, Duration::from_secs(1)).unwrap();
        db.provision_account("acct-1", 10).unwrap();
        db.increment_used("acct-1").unwrap();
        db.close().unwrap();

        let reopened = AccountDatabase::open(&path, Duration::from_secs(1)).unwrap();
        let quota = reopened.get_quota("acct-1").unwrap().unwrap();
        assert_eq!(quota.requests_used, 1);
    }
}

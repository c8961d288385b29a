use rusqlite::Connection;

pub const ACCOUNT_QUOTAS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS account_quotas (
    account_id TEXT PRIMARY KEY,
    requests_used INTEGER NOT NULL DEFAULT 0 CHECK (requests_used >= 0),
    requests_limit INTEGER NOT NULL CHECK (requests_limit >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub const ACCOUNT_QUOTAS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_account_quotas_created ON account_quotas(created_at DESC);
"#;

pub fn init_database(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(ACCOUNT_QUOTAS_TABLE_SCHEMA)?;
    conn.execute_batch(ACCOUNT_QUOTAS_INDEXES)?;
    Ok(())
}

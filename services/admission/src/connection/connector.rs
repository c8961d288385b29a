use std::fmt;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task;

use crate::storage::AccountDatabase;

use super::error::ConnectionError;

/// A live connection to the durable store.
#[async_trait]
pub trait StoreHandle: Send + Sync + 'static {
    /// Cheap liveness probe.
    async fn ping(self: Arc<Self>) -> Result<(), ConnectionError>;

    async fn close(self: Arc<Self>) -> Result<(), ConnectionError>;
}

/// Opens transport-level connections. One call is one attempt; retries
/// belong to the connection manager.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: StoreHandle;

    async fn open(&self) -> Result<Self::Handle, ConnectionError>;

    fn target(&self) -> String;
}

/// Read access to the managed handle. Derefs to the handle but never exposes
/// the owning `Arc`, so holders cannot close or replace the connection.
pub struct StoreLease<H> {
    handle: Arc<H>,
}

impl<H> StoreLease<H> {
    pub(crate) fn new(handle: Arc<H>) -> Self {
        Self { handle }
    }
}

impl<H> Clone for StoreLease<H> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
        }
    }
}

impl<H> Deref for StoreLease<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.handle
    }
}

impl<H> fmt::Debug for StoreLease<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLease").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteConnector {
    pub fn new(path: PathBuf, busy_timeout: Duration) -> Self {
        Self { path, busy_timeout }
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    type Handle = AccountDatabase;

    async fn open(&self) -> Result<AccountDatabase, ConnectionError> {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        task::spawn_blocking(move || AccountDatabase::open(&path, busy_timeout))
            .await
            .map_err(|err| ConnectionError::Transport(err.to_string()))?
            .map_err(ConnectionError::from)
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }
}

#[async_trait]
impl StoreHandle for AccountDatabase {
    async fn ping(self: Arc<Self>) -> Result<(), ConnectionError> {
        task::spawn_blocking(move || AccountDatabase::ping(&self))
            .await
            .map_err(|err| ConnectionError::ProbeFailed(err.to_string()))?
            .map_err(|err| ConnectionError::ProbeFailed(err.to_string()))
    }

    async fn close(self: Arc<Self>) -> Result<(), ConnectionError> {
        task::spawn_blocking(move || AccountDatabase::close(&self))
            .await
            .map_err(|err| ConnectionError::Transport(err.to_string()))?
            .map_err(ConnectionError::from)
    }
}

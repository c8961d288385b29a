use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::AdmissionConfig;

use super::connector::{Connector, SqliteConnector, StoreHandle, StoreLease};
use super::error::ConnectionError;
use super::retry::{RetryPolicy, RetryStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

struct ConnectionState<H> {
    status: ConnectionStatus,
    handle: Option<Arc<H>>,
    last_error: Option<ConnectionError>,
    /// Bumped each time an attempt sequence ends, whatever the outcome.
    generation: u64,
    /// Set by `disconnect`, cleared by the next explicit `connect`.
    released: bool,
}

/// Owns the single store connection for the process.
///
/// `connect` is single-flight: the first caller runs the retry sequence while
/// concurrent callers wait on `connect_lock` and then adopt its outcome.
/// `disconnect` never waits for that lock; it bumps the cancel epoch, which
/// aborts an in-flight sequence at its next await point. Waiters adopt a
/// cancellation only if the disconnect happened after they called `connect`.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    policy: RetryPolicy,
    connect_timeout: Duration,
    state: RwLock<ConnectionState<C::Handle>>,
    connect_lock: Mutex<()>,
    cancel: watch::Sender<u64>,
    attempts: AtomicU64,
}

impl ConnectionManager<SqliteConnector> {
    pub fn from_config(config: &AdmissionConfig) -> Self {
        let connector = SqliteConnector::new(config.database_path(), config.operation_timeout());
        Self::new(connector, config.retry_policy(), config.connect_timeout())
    }
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, policy: RetryPolicy, connect_timeout: Duration) -> Self {
        let (cancel, _) = watch::channel(0u64);
        Self {
            connector,
            policy,
            connect_timeout,
            state: RwLock::new(ConnectionState {
                status: ConnectionStatus::Disconnected,
                handle: None,
                last_error: None,
                generation: 0,
                released: false,
            }),
            connect_lock: Mutex::new(()),
            cancel,
            attempts: AtomicU64::new(0),
        }
    }

    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.connect_with(false).await
    }

    /// Reconnect path of the health monitor. Gives up with `Cancelled` when
    /// the connection was released by `disconnect`.
    async fn restore(&self) -> Result<(), ConnectionError> {
        self.connect_with(true).await
    }

    async fn connect_with(&self, keep_released: bool) -> Result<(), ConnectionError> {
        let (observed, observed_epoch) = {
            let state = self.read_state();
            if state.status == ConnectionStatus::Connected {
                return Ok(());
            }
            (state.generation, *self.cancel.borrow())
        };

        let _flight = self.connect_lock.lock().await;

        {
            let state = self.read_state();
            if state.status == ConnectionStatus::Connected {
                return Ok(());
            }
            if state.generation != observed {
                match state.last_error.clone() {
                    Some(ConnectionError::Cancelled)
                        if *self.cancel.borrow() == observed_epoch => {}
                    Some(err) => return Err(err),
                    None => {}
                }
            }
        }

        self.run_attempts(keep_released).await
    }

    pub async fn disconnect(&self) {
        let (previous, handle) = {
            let mut state = self.write_state();
            self.cancel.send_modify(|epoch| *epoch += 1);
            let previous = state.status;
            state.status = ConnectionStatus::Disconnected;
            state.released = true;
            (previous, state.handle.take())
        };

        if let Some(handle) = handle {
            if let Err(err) = handle.close().await {
                warn!(error = %err, "error while closing store connection");
            }
        }

        if previous != ConnectionStatus::Disconnected {
            info!(target_store = %self.connector.target(), ?previous, "disconnected from store");
        }
    }

    /// Records an unexpected close from the transport. Only a connected
    /// manager is affected; the next `connect` starts a fresh sequence.
    pub async fn mark_lost(&self, reason: &str) {
        let handle = {
            let mut state = self.write_state();
            if state.status != ConnectionStatus::Connected {
                return;
            }
            state.status = ConnectionStatus::Disconnected;
            state.last_error = Some(ConnectionError::Transport(reason.to_string()));
            state.handle.take()
        };

        warn!(target_store = %self.connector.target(), reason, "store connection lost");

        if let Some(handle) = handle {
            if let Err(err) = handle.close().await {
                debug!(error = %err, "closing lost store connection failed");
            }
        }
    }

    pub async fn health_check(&self) -> bool {
        let handle = {
            let state = self.read_state();
            match (&state.status, &state.handle) {
                (ConnectionStatus::Connected, Some(handle)) => Arc::clone(handle),
                _ => return false,
            }
        };

        match timeout(self.connect_timeout, handle.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(error = %err, "store health check failed");
                false
            }
            Err(_) => {
                warn!(timeout = ?self.connect_timeout, "store health check timed out");
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        let state = self.read_state();
        state.status == ConnectionStatus::Connected && state.handle.is_some()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.read_state().status
    }

    pub fn last_error(&self) -> Option<ConnectionError> {
        self.read_state().last_error.clone()
    }

    /// Returns the live handle, or `NotConnected` unless the manager is
    /// connected.
    pub fn database(&self) -> Result<StoreLease<C::Handle>, ConnectionError> {
        let state = self.read_state();
        match (&state.status, &state.handle) {
            (ConnectionStatus::Connected, Some(handle)) => Ok(StoreLease::new(Arc::clone(handle))),
            _ => Err(ConnectionError::NotConnected),
        }
    }

    /// Total transport-level attempts made over the manager's lifetime.
    pub fn attempts_made(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn target(&self) -> String {
        self.connector.target()
    }

    pub fn start_health_monitor(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if self.read_state().released {
                    continue;
                }

                if self.health_check().await {
                    debug!("store health check passed");
                    continue;
                }

                self.mark_lost("health check failed").await;
                match self.restore().await {
                    Ok(()) => info!("store connection re-established"),
                    Err(ConnectionError::Cancelled) => {
                        debug!("store released by disconnect; not reconnecting")
                    }
                    Err(err) => warn!(error = %err, "store reconnect failed"),
                }
            }
        })
    }

    async fn run_attempts(&self, keep_released: bool) -> Result<(), ConnectionError> {
        let mut cancel_rx = self.cancel.subscribe();
        let epoch = {
            let mut state = self.write_state();
            if keep_released && state.released {
                return Err(ConnectionError::Cancelled);
            }
            state.released = false;
            state.status = ConnectionStatus::Connecting;
            *cancel_rx.borrow_and_update()
        };
        info!(
            target_store = %self.connector.target(),
            max_attempts = self.policy.max_attempts,
            "connecting to store"
        );

        let mut schedule = self.policy.schedule();
        let mut last_error = ConnectionError::NotConnected;

        loop {
            match schedule.step() {
                RetryStep::Attempt(attempt) => {
                    let outcome = tokio::select! {
                        biased;
                        _ = cancel_rx.changed() => return self.finish_cancelled(),
                        outcome = self.attempt_once() => outcome,
                    };

                    match outcome {
                        Ok(handle) => {
                            schedule.on_success();
                            return self.finish_connected(handle, epoch, attempt).await;
                        }
                        Err(err) => {
                            warn!(attempt, error = %err, "store connection attempt failed");
                            last_error = err;
                            schedule.on_failure();
                        }
                    }
                }
                RetryStep::Backoff {
                    failed_attempt,
                    delay,
                } => {
                    let delay = self.policy.with_jitter(delay);
                    debug!(
                        failed_attempt,
                        backoff_ms = delay.as_millis() as u64,
                        "backing off before next connection attempt"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel_rx.changed() => return self.finish_cancelled(),
                        _ = sleep(delay) => {
                            schedule.on_backoff_elapsed();
                        }
                    }
                }
                RetryStep::Exhausted { attempts } => {
                    let err = ConnectionError::Exhausted {
                        attempts,
                        last_error: Box::new(last_error),
                    };
                    error!(
                        target_store = %self.connector.target(),
                        error = %err,
                        "giving up on store connection"
                    );
                    let mut state = self.write_state();
                    state.status = ConnectionStatus::Failed;
                    state.handle = None;
                    state.last_error = Some(err.clone());
                    state.generation += 1;
                    return Err(err);
                }
                RetryStep::Succeeded { .. } => return Ok(()),
            }
        }
    }

    /// One transport open plus liveness probe. A failed probe closes the
    /// half-open handle before reporting.
    async fn attempt_once(&self) -> Result<Arc<C::Handle>, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let handle = timeout(self.connect_timeout, self.connector.open())
            .await
            .map_err(|_| ConnectionError::Timeout {
                operation: "connect",
                timeout: self.connect_timeout,
            })??;
        let handle = Arc::new(handle);

        let probe = match timeout(self.connect_timeout, Arc::clone(&handle).ping()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout {
                operation: "ping",
                timeout: self.connect_timeout,
            }),
        };

        match probe {
            Ok(()) => Ok(handle),
            Err(err) => {
                if let Err(close_err) = handle.close().await {
                    debug!(error = %close_err, "closing half-open connection failed");
                }
                Err(err)
            }
        }
    }

    async fn finish_connected(
        &self,
        handle: Arc<C::Handle>,
        epoch: u64,
        attempts: u32,
    ) -> Result<(), ConnectionError> {
        let stale = {
            let mut state = self.write_state();
            state.generation += 1;
            if *self.cancel.borrow() != epoch {
                state.status = ConnectionStatus::Disconnected;
                state.last_error = Some(ConnectionError::Cancelled);
                Some(handle)
            } else {
                state.status = ConnectionStatus::Connected;
                state.handle = Some(handle);
                state.last_error = None;
                None
            }
        };

        match stale {
            Some(handle) => {
                if let Err(err) = handle.close().await {
                    debug!(error = %err, "closing cancelled connection failed");
                }
                Err(ConnectionError::Cancelled)
            }
            None => {
                info!(
                    target_store = %self.connector.target(),
                    attempts,
                    "connected to store"
                );
                Ok(())
            }
        }
    }

    fn finish_cancelled(&self) -> Result<(), ConnectionError> {
        let mut state = self.write_state();
        state.status = ConnectionStatus::Disconnected;
        state.handle = None;
        state.last_error = Some(ConnectionError::Cancelled);
        state.generation += 1;
        info!("store connection attempt cancelled");
        Err(ConnectionError::Cancelled)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ConnectionState<C::Handle>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ConnectionState<C::Handle>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

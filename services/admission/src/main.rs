use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use chat_admission::{
    AdmissionConfig, AdmissionPipeline, ConnectionManager, QuotaGate, WindowLimiter,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AdmissionConfig::from_env()?;
    init_tracing(&config.log_level)?;

    info!(
        data_dir = %config.data_dir.display(),
        enforcement = ?config.quota_enforcement,
        max_retries = config.max_retries,
        "starting chat admission service"
    );

    let connection = Arc::new(ConnectionManager::from_config(&config));
    let quota = Arc::new(QuotaGate::new(
        Arc::clone(&connection),
        config.operation_timeout(),
        config.default_requests_limit,
    ));

    match connection.connect().await {
        Ok(()) => {
            match quota.count_accounts().await {
                Ok(accounts) => info!(accounts, "account store ready"),
                Err(err) => warn!(error = %err, "failed to count accounts"),
            }
            match quota.apply_limit_overrides(&config.limit_overrides).await {
                Ok(applied) => info!(applied, "applied request limit overrides"),
                Err(err) => warn!(error = %err, "failed to apply request limit overrides"),
            }
        }
        Err(err) => warn!(error = %err, "store unavailable at startup; will retry on demand"),
    }

    let pipeline =
        AdmissionPipeline::from_config(WindowLimiter::new(), Arc::clone(&quota), &config);
    let cleanup_task = pipeline
        .limiter()
        .start_cleanup_task(config.cleanup_interval());
    let health_task = Arc::clone(&connection).start_health_monitor(config.health_check_interval());

    shutdown_signal().await;
    info!("chat admission service shutting down");

    health_task.abort();
    cleanup_task.abort();
    connection.disconnect().await;

    Ok(())
}

fn init_tracing(default_level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

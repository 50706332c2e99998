//! Workq Daemon - Main Entry Point
//! Recovery, worker pool and retention sweep over one storage backend

mod backend;
mod config;
mod handlers;
mod logging;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use config::DaemonConfig;
use workq_core::application::recovery::RecoveryService;
use workq_core::application::worker::shutdown_channel;
use workq_core::application::WorkerPool;
use workq_core::port::time_provider::SystemTimeProvider;
use workq_core::port::JobRepository;
use workq_core::AppError;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long to wait for the cleanup task after it is signalled
const CLEANUP_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    let _log_guard = logging::init_logging();
    info!("Workq daemon v{} starting...", VERSION);

    // 2. Load configuration
    let config = DaemonConfig::from_env()?;
    info!(
        queues = ?config.queues,
        workers = config.worker.worker_count,
        rate_limiting = config.worker.enable_rate_limiting,
        "Configuration loaded"
    );

    // 3. Initialize storage (DI wiring)
    let job_repo = backend::open_repository(&config).await?;
    let time_provider = Arc::new(SystemTimeProvider);

    // 4. Run crash recovery
    info!("Running crash recovery...");
    let recovery_service = RecoveryService::new(
        job_repo.clone(),
        time_provider.clone(),
        Some(config.recovery_window),
    );
    match recovery_service.recover_orphaned_jobs().await {
        Ok(count) => info!(recovered_jobs = count, "Crash recovery completed"),
        Err(e) => error!(error = ?e, "Crash recovery failed"),
    }

    // 5. Start worker pool
    info!("Starting worker pool...");
    let pool = WorkerPool::new(job_repo.clone(), config.worker.clone())
        .with_time_provider(time_provider);
    pool.register_handler(handlers::ECHO_JOB_TYPE, handlers::echo);
    // One signal for the worker loops and the retention sweep
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    pool.start(shutdown_rx.clone(), config.queues.clone())?;

    // 6. Start retention sweep
    let cleanup_handle = pool.start_background_cleanup(shutdown_rx);

    info!(handlers = pool.handler_count(), "System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Draining workers...");

    // 8. Graceful shutdown
    match pool.stop().await {
        Ok(()) => {}
        Err(AppError::ShutdownTimeout(timeout)) => warn!(
            timeout_ms = timeout.as_millis() as u64,
            "Workers still busy at shutdown timeout; their jobs will be recovered on next start"
        ),
        Err(e) => error!(error = %e, "Worker pool stop failed"),
    }

    shutdown_tx.shutdown();
    if tokio::time::timeout(CLEANUP_STOP_TIMEOUT, cleanup_handle)
        .await
        .is_err()
    {
        warn!("Cleanup task did not stop in time");
    }

    job_repo.close().await?;
    info!("Shutdown complete.");

    Ok(())
}

//! Batchline - Worker Daemon Entry Point

mod settings;

use anyhow::{Context, Result};
use batchline_core::application::{
    shutdown_channel, Dispatcher, PruneScheduler, RetryPolicy, Worker,
};
use batchline_core::port::{OrderedUuidProvider, SystemTimeProvider, TimeProvider};
use batchline_infra_sqlite::{
    create_pool, run_migrations, SqliteBatchRepository, SqliteCacheStore, SqliteQueue,
};
use futures::future::join_all;
use settings::{DaemonConfig, LogFormat};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Time allowed for in-flight jobs after the shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Wait for every worker under one shared deadline; false if it ran out
async fn wait_for_workers(handles: Vec<JoinHandle<()>>, grace: Duration) -> bool {
    tokio::time::timeout(grace, join_all(handles)).await.is_ok()
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("batchline=info"))
        .context("failed to create env filter")?;

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration + logging
    let config = DaemonConfig::load()?;
    init_tracing(config.log_format)?;

    info!("Batchline v{} starting...", batchline_core::VERSION);

    // 2. Databases
    info!(database_url = %config.database_url, queue_database_url = %config.queue_database_url, "Initializing databases...");
    let pool = create_pool(&config.database_url)
        .await
        .context("batch database pool creation failed")?;
    run_migrations(&pool).await.context("batch database migration failed")?;

    let queue_pool = create_pool(&config.queue_database_url)
        .await
        .context("queue database pool creation failed")?;
    run_migrations(&queue_pool)
        .await
        .context("queue database migration failed")?;

    // 3. Wiring
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let repository = Arc::new(SqliteBatchRepository::new(
        pool.clone(),
        time_provider.clone(),
        Arc::new(OrderedUuidProvider),
    ));
    let queue = Arc::new(SqliteQueue::new(queue_pool, time_provider.clone()));
    let cache = Arc::new(SqliteCacheStore::new(pool, time_provider.clone()));

    let dispatcher = Dispatcher::builder(repository.clone(), queue, cache).build();
    let retry_policy = Arc::new(RetryPolicy::new(config.retry_base_delay_ms));

    // 4. Workers, one per queue
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut worker_handles = Vec::new();
    for queue_name in config.queue_names() {
        info!(queue = %queue_name, "Starting worker...");
        let worker = Worker::new(queue_name, dispatcher.clone(), retry_policy.clone());
        let token = shutdown_rx.clone();
        worker_handles.push(tokio::spawn(async move {
            if let Err(e) = worker.run(token).await {
                error!(error = ?e, "Worker failed");
            }
        }));
    }

    // 5. Prune scheduler
    info!("Starting prune scheduler...");
    let prune_scheduler = PruneScheduler::new(repository, time_provider, config.prune_config());
    let prune_handle = tokio::spawn(prune_scheduler.run());

    info!("System ready. Press Ctrl+C to shutdown");

    // 6. Graceful shutdown
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    shutdown_tx.shutdown();
    prune_handle.abort();
    if !wait_for_workers(worker_handles, SHUTDOWN_GRACE).await {
        warn!("Workers still busy after shutdown grace, exiting anyway");
    }
    if let Err(e) = dispatcher.terminate().await {
        error!(error = %e, "After-response hooks failed during shutdown");
    }

    info!("Shutdown complete.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_shutdown_grace_is_shared_by_all_workers() {
        let handles: Vec<_> = (0..5)
            .map(|_| tokio::spawn(tokio::time::sleep(Duration::from_secs(30))))
            .collect();

        let started = Instant::now();
        assert!(!wait_for_workers(handles, Duration::from_millis(100)).await);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_finished_workers_are_joined() {
        let handles: Vec<_> = (0..3).map(|_| tokio::spawn(async {})).collect();
        assert!(wait_for_workers(handles, Duration::from_secs(1)).await);
    }
}

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use consultd::clock::SystemClock;
use consultd::config::Config;
use consultd::engine::Engine;
use consultd::notify::NotifyHub;
use consultd::reconcile;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    consultd::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::new(
        config.wal_path(),
        config.engine.clone(),
        Arc::new(SystemClock),
    )?);
    let notifier = Arc::new(NotifyHub::new());

    let shutdown = CancellationToken::new();
    let reconciler = tokio::spawn(reconcile::run_reconciler(
        engine.clone(),
        notifier,
        config.worker.clone(),
        shutdown.clone(),
    ));
    let compactor = tokio::spawn(reconcile::run_compactor(
        engine.clone(),
        config.compact_threshold,
        shutdown.clone(),
    ));

    info!("consultd running");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  tick interval: {:?}", config.worker.tick_interval);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    wait_for_signal().await?;
    info!("shutdown signal received, stopping background tasks");
    shutdown.cancel();
    let _ = tokio::join!(reconciler, compactor);

    // Leave a compact log behind for the next start.
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final WAL compaction failed: {e}");
    }
    info!("consultd stopped");
    Ok(())
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

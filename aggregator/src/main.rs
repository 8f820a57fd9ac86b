// Portfolio blotter aggregator service entry point.

use anyhow::Result;
use blotter_aggregator::{
    spawn_ingest, BootstrapLoader, HealthRegistry, PortfolioStore, RedisTransport,
    SnapshotPublisher, SnapshotReceiver,
};
use blotter_common::{BackoffPolicy, BlotterConfig, MetricsCollector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "blotter_aggregator=info,blotter_common=info".to_string()
        }))
        .init();

    info!("🚀 Starting portfolio blotter aggregator");
    let config = BlotterConfig::from_env();
    info!(
        redis = %config.redis_url,
        bootstrap = %config.bootstrap_base_url,
        refresh_ms = config.refresh_interval_ms,
        "configuration loaded"
    );

    let metrics = Arc::new(MetricsCollector::new());
    let health = Arc::new(HealthRegistry::new());
    let store = Arc::new(PortfolioStore::new(
        health.clone(),
        metrics.clone(),
        config.execution_tail,
        config.preseed_buffer_size,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Subscriptions start before the seed; anything they deliver early is
    // buffered in the store and replayed once the seed lands.
    let transport = Arc::new(RedisTransport::new(&config.redis_url)?);
    let mut tasks = spawn_ingest(
        transport,
        &config,
        store.clone(),
        health.clone(),
        metrics.clone(),
        shutdown_rx.clone(),
    );

    let mut loader = BootstrapLoader::new(
        &config.bootstrap_base_url,
        Duration::from_millis(config.bootstrap_timeout_ms),
        config.bootstrap_attempts,
        BackoffPolicy::from_millis(config.reconnect_initial_ms, config.reconnect_max_ms),
        config.bootstrap_execution_limit,
    )?;
    match loader.load().await {
        Ok(seed) => store.seed(seed),
        Err(e) if config.allow_empty_seed => {
            warn!("bootstrap failed ({e}), starting from an explicit empty seed");
            store.seed(Default::default());
        }
        Err(e) => {
            error!("bootstrap failed and ALLOW_EMPTY_SEED is off: {e}");
            return Err(e.into());
        }
    }

    let (publisher, snapshots) = SnapshotPublisher::new(
        store.clone(),
        Duration::from_millis(config.refresh_interval_ms),
        metrics.clone(),
    );
    tasks.push(tokio::spawn(publisher.run(shutdown_rx.clone())));
    tasks.push(tokio::spawn(log_summaries(snapshots, shutdown_rx.clone())));

    info!("✅ Aggregator running");
    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutdown signal received");
    let _ = shutdown_tx.send(true);

    let deadline =
        tokio::time::Instant::now() + Duration::from_millis(config.shutdown_grace_ms);
    for task in tasks {
        let abort = task.abort_handle();
        if tokio::time::timeout_at(deadline, task).await.is_err() {
            warn!("task exceeded shutdown grace period, aborting");
            abort.abort();
        }
    }
    info!("Aggregator stopped");
    Ok(())
}

/// Stand-in for a UI: logs a portfolio summary from the latest snapshot.
async fn log_summaries(snapshots: SnapshotReceiver, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let latest = snapshots.borrow().clone();
                if let Some(snapshot) = latest {
                    info!(
                        sequence = snapshot.sequence,
                        healthy = snapshot.healthy,
                        open_positions = snapshot.open_position_count(),
                        working_orders = snapshot.orders.len(),
                        market_value = snapshot.total_market_value(),
                        unrealized_pnl = snapshot.total_unrealized_pnl(),
                        realized_pnl = snapshot.total_realized_pnl(),
                        "📊 portfolio summary"
                    );
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

//! Operator mode wiring.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use gridscale_lock::{generate_owner, LockMaintainer, PgLockStore};
use gridscale_operator::pruner::AppMetricsPruner;
use gridscale_operator::sync::{sync_schedules_fn, ScheduleSynchronizer, SchedulerClient};
use gridscale_operator::OperatorRunner;

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    info!("gridscale daemon starting in operator mode");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("gridscale.redb");
    let store = gridscale_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Leader election ────────────────────────────────────────

    let owner = generate_owner();
    info!(%owner, "competing for the operator lock");
    let lock_store = Arc::new(PgLockStore::connect(&config.lock.url).await?);
    let (maintainer, leadership) = LockMaintainer::new(
        lock_store,
        owner,
        config.lock.ttl(),
        config.lock.retry_interval(),
    );

    // ── Duties ─────────────────────────────────────────────────

    let pruner = OperatorRunner::new(
        Box::new(AppMetricsPruner::new(
            store.clone(),
            config.operator.app_metrics_cutoff(),
        )),
        config.operator.prune_interval(),
        leadership.clone(),
    );

    let scheduler_client = Arc::new(SchedulerClient::new(
        config.operator.scheduler_url.clone(),
        config.metrics_backend.timeout(),
    ));
    let synchronizer = OperatorRunner::new(
        Box::new(ScheduleSynchronizer::new(sync_schedules_fn(scheduler_client))),
        config.operator.sync_interval(),
        leadership,
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::new();
    handles.push(tokio::spawn(maintainer.run(shutdown_rx.clone())));
    handles.push(tokio::spawn({
        let rx = shutdown_rx.clone();
        async move { pruner.run(rx).await }
    }));
    handles.push(tokio::spawn({
        let rx = shutdown_rx.clone();
        async move { synchronizer.run(rx).await }
    }));

    // ── Health endpoint ────────────────────────────────────────

    let query_metrics: gridscale_api::QueryMetricsFn = {
        let store = store.clone();
        Arc::new(move |app_id, metric_type, start, end, order| {
            store.retrieve_app_metrics(app_id, metric_type, start, end, order)
        })
    };
    let router = gridscale_api::build_router(gridscale_api::ApiState { query_metrics });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "health endpoint starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    for handle in handles {
        let _ = handle.await;
    }

    info!("gridscale daemon stopped");
    Ok(())
}

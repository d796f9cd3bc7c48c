//! Event-generation mode wiring.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::info;

use gridscale_eventgen::aggregator::Aggregator;
use gridscale_eventgen::app_manager::AppManager;
use gridscale_eventgen::clients::{fetch_metrics_fn, scale_fn, MetricsClient, ScalingClient};
use gridscale_eventgen::evaluation_manager::AppEvaluationManager;
use gridscale_eventgen::evaluator::Evaluator;
use gridscale_eventgen::poller::MetricPoller;
use gridscale_eventgen::{GetPoliciesFn, QueryAppMetricsFn, SaveToCacheFn};

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    info!("gridscale daemon starting in eventgen mode");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("gridscale.redb");
    let store = gridscale_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Pipeline pieces ────────────────────────────────────────

    let app_manager = Arc::new(AppManager::new(store.clone(), &config.aggregator));

    let get_policies: GetPoliciesFn = {
        let am = app_manager.clone();
        Arc::new(move || am.get_policies())
    };
    let save_to_cache: SaveToCacheFn = {
        let am = app_manager.clone();
        Arc::new(move |metric| am.save_metric_to_cache(metric))
    };
    let query_metrics: QueryAppMetricsFn = {
        let am = app_manager.clone();
        Arc::new(move |app_id, metric_type, start, end, order| {
            am.query_app_metrics(app_id, metric_type, start, end, order)
        })
    };

    let metrics_client = Arc::new(MetricsClient::new(
        config.metrics_backend.url.clone(),
        config.metrics_backend.timeout(),
    ));
    let scaling_client = Arc::new(ScalingClient::new(
        config.scaling_engine.url.clone(),
        config.scaling_engine.timeout(),
    ));

    let (monitor_tx, monitor_rx) = flume::bounded(config.aggregator.app_monitor_channel_size);
    let (metric_tx, metric_rx) = mpsc::channel(config.aggregator.app_metric_channel_size);
    let (trigger_tx, trigger_rx) = flume::bounded(config.evaluator.trigger_channel_size);

    let aggregator = Aggregator::new(
        config.aggregator.clone(),
        get_policies.clone(),
        save_to_cache,
        store.clone(),
        monitor_tx,
        metric_rx,
    );

    let evaluation_manager = Arc::new(AppEvaluationManager::new(
        config.evaluator.clone(),
        config.breaker.clone(),
        get_policies,
        trigger_tx,
    ));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let mut handles = Vec::new();

    handles.push(tokio::spawn({
        let am = app_manager.clone();
        let rx = shutdown_rx.clone();
        async move { am.run(rx).await }
    }));

    handles.push(tokio::spawn(aggregator.run(shutdown_rx.clone())));

    for index in 0..config.aggregator.metric_poller_count {
        let poller = MetricPoller::new(
            index,
            monitor_rx.clone(),
            fetch_metrics_fn(metrics_client.clone()),
            metric_tx.clone(),
        );
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { poller.run(rx).await }));
    }
    drop(metric_tx);

    handles.push(tokio::spawn({
        let em = evaluation_manager.clone();
        let rx = shutdown_rx.clone();
        async move { em.run(rx).await }
    }));

    for index in 0..config.evaluator.evaluator_count {
        let evaluator = Evaluator::new(
            index,
            trigger_rx.clone(),
            query_metrics.clone(),
            scale_fn(scaling_client.clone()),
            evaluation_manager.clone(),
        );
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { evaluator.run(rx).await }));
    }

    // ── Read API ───────────────────────────────────────────────

    let router = gridscale_api::build_router(gridscale_api::ApiState {
        query_metrics: query_metrics.clone(),
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "read API starting");
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

//! Metric aggregator.
//!
//! On every execute tick, turns the current policy snapshot into
//! app-monitor work items and fans them out to the poller pool. Pollers
//! send aggregated metrics back on the metric channel; those are
//! batched and flushed to the cache and the store on the save tick.

use std::collections::HashSet;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use gridscale_models::{AppMetric, AppMonitor};
use gridscale_state::StateStore;

use crate::config::AggregatorConfig;
use crate::{GetPoliciesFn, SaveToCacheFn};

pub struct Aggregator {
    config: AggregatorConfig,
    get_policies: GetPoliciesFn,
    save_to_cache: SaveToCacheFn,
    store: StateStore,
    monitor_tx: flume::Sender<AppMonitor>,
    metric_rx: mpsc::Receiver<AppMetric>,
    batch: Vec<AppMetric>,
}

impl Aggregator {
    pub fn new(
        config: AggregatorConfig,
        get_policies: GetPoliciesFn,
        save_to_cache: SaveToCacheFn,
        store: StateStore,
        monitor_tx: flume::Sender<AppMonitor>,
        metric_rx: mpsc::Receiver<AppMetric>,
    ) -> Self {
        Self {
            config,
            get_policies,
            save_to_cache,
            store,
            monitor_tx,
            metric_rx,
            batch: Vec::new(),
        }
    }

    /// Run the schedule/collect/flush loop until shutdown.
    ///
    /// Any metrics still batched at shutdown are flushed before exit.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            execute_secs = self.config.aggregator_execute_interval_secs,
            save_secs = self.config.save_interval_secs,
            "aggregator started"
        );
        let mut execute = tokio::time::interval(self.config.execute_interval());
        let mut save = tokio::time::interval(self.config.save_interval());
        loop {
            tokio::select! {
                _ = execute.tick() => self.schedule_monitors().await,
                _ = save.tick() => self.flush(),
                metric = self.metric_rx.recv() => match metric {
                    Some(metric) => self.batch.push(metric),
                    None => {
                        warn!("metric channel closed, aggregator stopping");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    info!("aggregator shutting down");
                    break;
                }
            }
        }
        self.flush();
    }

    /// Enqueue one monitor per distinct (app, metric type) in the
    /// current policy snapshot.
    async fn schedule_monitors(&self) {
        let policies = (self.get_policies)();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for (app_id, policy) in &policies {
            for rule in &policy.scaling_rules {
                if !seen.insert((app_id.clone(), rule.metric_type.clone())) {
                    continue;
                }
                let monitor = AppMonitor {
                    app_id: app_id.clone(),
                    metric_type: rule.metric_type.clone(),
                    stat_window: rule.stat_window(self.config.default_stat_window_secs),
                };
                if self.monitor_tx.send_async(monitor).await.is_err() {
                    warn!("monitor channel closed, dropping remaining monitors");
                    return;
                }
            }
        }
        debug!(monitors = seen.len(), apps = policies.len(), "monitors scheduled");
    }

    /// Persist the pending batch to the cache and the store.
    ///
    /// The batch is cleared even when the store write fails; cached
    /// copies keep the evaluators going until the next poll round.
    fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        for metric in &self.batch {
            (self.save_to_cache)(metric);
        }
        if let Err(e) = self.store.save_app_metrics(&self.batch) {
            error!(error = %e, count = self.batch.len(), "failed to persist metric batch");
        } else {
            debug!(count = self.batch.len(), "metric batch persisted");
        }
        self.batch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use gridscale_models::{Operator, Order, Policy, ScalingRule};

    fn rule(metric_type: &str, stat_window_secs: i64) -> ScalingRule {
        ScalingRule {
            metric_type: metric_type.to_string(),
            stat_window_secs,
            breach_duration_secs: 300,
            threshold: 30,
            operator: Operator::Ge,
            cool_down_secs: 300,
            adjustment: "+1".to_string(),
        }
    }

    fn policy(app_id: &str, rules: Vec<ScalingRule>) -> (String, Arc<Policy>) {
        (
            app_id.to_string(),
            Arc::new(Policy {
                app_id: app_id.to_string(),
                instance_min_count: 1,
                instance_max_count: 5,
                scaling_rules: rules,
            }),
        )
    }

    fn metric(ts: i64) -> AppMetric {
        AppMetric {
            app_id: "app-1".to_string(),
            metric_type: "memoryused".to_string(),
            unit: "megabytes".to_string(),
            value: Some(ts),
            timestamp: ts,
        }
    }

    fn aggregator(
        policies: HashMap<String, Arc<Policy>>,
        cached: Arc<Mutex<Vec<AppMetric>>>,
    ) -> (Aggregator, flume::Receiver<AppMonitor>, mpsc::Sender<AppMetric>) {
        let (monitor_tx, monitor_rx) = flume::bounded(16);
        let (metric_tx, metric_rx) = mpsc::channel(16);
        let get_policies: GetPoliciesFn = Arc::new(move || policies.clone());
        let save_to_cache: SaveToCacheFn = Arc::new(move |m| {
            cached.lock().unwrap().push(m.clone());
            true
        });
        let agg = Aggregator::new(
            AggregatorConfig::default(),
            get_policies,
            save_to_cache,
            StateStore::open_in_memory().unwrap(),
            monitor_tx,
            metric_rx,
        );
        (agg, monitor_rx, metric_tx)
    }

    #[tokio::test]
    async fn schedules_one_monitor_per_app_metric_pair() {
        let policies: HashMap<_, _> = [
            policy("app-1", vec![rule("memoryused", 120), rule("throughput", 60)]),
            policy("app-2", vec![rule("memoryused", 300)]),
        ]
        .into_iter()
        .collect();
        let (agg, monitor_rx, _metric_tx) = aggregator(policies, Arc::default());

        agg.schedule_monitors().await;

        let mut monitors: Vec<AppMonitor> = monitor_rx.drain().collect();
        monitors.sort_by(|a, b| {
            (&a.app_id, &a.metric_type).cmp(&(&b.app_id, &b.metric_type))
        });
        assert_eq!(monitors.len(), 3);
        assert_eq!(monitors[0].app_id, "app-1");
        assert_eq!(monitors[0].metric_type, "memoryused");
        assert_eq!(monitors[0].stat_window, Duration::from_secs(120));
        assert_eq!(monitors[2].app_id, "app-2");
        assert_eq!(monitors[2].stat_window, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn deduplicates_rules_on_the_same_metric() {
        // Two rules on one metric (scale-out and scale-in) need only
        // one poll.
        let policies: HashMap<_, _> =
            [policy("app-1", vec![rule("memoryused", 120), rule("memoryused", 120)])]
                .into_iter()
                .collect();
        let (agg, monitor_rx, _metric_tx) = aggregator(policies, Arc::default());

        agg.schedule_monitors().await;

        assert_eq!(monitor_rx.drain().count(), 1);
    }

    #[tokio::test]
    async fn flush_writes_cache_and_store_and_clears_batch() {
        let cached = Arc::new(Mutex::new(Vec::new()));
        let (mut agg, _monitor_rx, _metric_tx) = aggregator(HashMap::new(), cached.clone());
        agg.batch = vec![metric(100), metric(200)];

        agg.flush();

        assert!(agg.batch.is_empty());
        assert_eq!(cached.lock().unwrap().len(), 2);
        let stored = agg
            .store
            .retrieve_app_metrics("app-1", "memoryused", 0, -1, Order::Asc)
            .unwrap();
        assert_eq!(stored.len(), 2);

        // Second flush with an empty batch is a no-op.
        agg.flush();
        assert_eq!(cached.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn run_flushes_pending_metrics_on_shutdown() {
        let cached = Arc::new(Mutex::new(Vec::new()));
        let (agg, _monitor_rx, metric_tx) = aggregator(HashMap::new(), cached.clone());
        let store = agg.store.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(agg.run(shutdown_rx));
        metric_tx.send(metric(100)).await.unwrap();
        // Let the loop pick the metric up before signalling shutdown.
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let stored = store
            .retrieve_app_metrics("app-1", "memoryused", 0, -1, Order::Asc)
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(cached.lock().unwrap().len(), 1);
    }
}

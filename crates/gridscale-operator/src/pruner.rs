//! Aggregated-metric pruning.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use gridscale_state::StateStore;

use crate::{now_nanos, OperatorTask};

/// Deletes aggregated metrics older than the cutoff.
pub struct AppMetricsPruner {
    store: StateStore,
    cutoff: Duration,
}

impl AppMetricsPruner {
    pub fn new(store: StateStore, cutoff: Duration) -> Self {
        Self { store, cutoff }
    }
}

#[async_trait]
impl OperatorTask for AppMetricsPruner {
    fn name(&self) -> &str {
        "app-metrics-pruner"
    }

    async fn operate(&self) -> anyhow::Result<()> {
        let before = now_nanos() - self.cutoff.as_nanos() as i64;
        let pruned = self.store.prune_app_metrics(before)?;
        info!(pruned, "aggregated metrics pruned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use gridscale_models::{AppMetric, Order};

    fn metric(timestamp: i64) -> AppMetric {
        AppMetric {
            app_id: "app-1".to_string(),
            metric_type: "memoryused".to_string(),
            unit: "megabytes".to_string(),
            value: Some(1),
            timestamp,
        }
    }

    #[tokio::test]
    async fn prunes_only_metrics_older_than_cutoff() {
        let store = StateStore::open_in_memory().unwrap();
        let now = now_nanos();
        let hour = Duration::from_secs(3600).as_nanos() as i64;
        store.save_app_metric(&metric(now - 3 * hour)).unwrap();
        store.save_app_metric(&metric(now - 2 * hour)).unwrap();
        store.save_app_metric(&metric(now)).unwrap();

        let pruner = AppMetricsPruner::new(store.clone(), Duration::from_secs(90 * 60));
        pruner.operate().await.unwrap();

        let left = store
            .retrieve_app_metrics("app-1", "memoryused", 0, -1, Order::Asc)
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].timestamp, now);
    }

    #[tokio::test]
    async fn pruning_an_empty_store_is_fine() {
        let store = StateStore::open_in_memory().unwrap();
        let pruner = AppMetricsPruner::new(store, Duration::from_secs(3600));
        pruner.operate().await.unwrap();
    }
}

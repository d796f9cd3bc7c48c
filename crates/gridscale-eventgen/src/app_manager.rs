//! Policy/app manager.
//!
//! Polls the policy store on a fixed interval, holds the current policy
//! snapshot in memory, and fronts aggregated-metric queries with the
//! per-app cache. Readers never block on I/O: `get_policies` hands out
//! the last good snapshot even when a poll fails.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use gridscale_models::{AppMetric, Order, Policy};
use gridscale_state::{StateResult, StateStore};

use crate::cache::MetricCache;
use crate::config::AggregatorConfig;
use crate::now_nanos;

type PolicyMap = HashMap<String, Arc<Policy>>;
type CacheMap = HashMap<String, Arc<Mutex<MetricCache>>>;

/// Owns the policy snapshot and the sharded per-app metric cache.
pub struct AppManager {
    store: StateStore,
    interval: Duration,
    cache_size_per_app: usize,
    policies: RwLock<PolicyMap>,
    /// Per-app caches behind their own mutexes so writers for
    /// unrelated apps don't contend.
    caches: RwLock<CacheMap>,
}

impl AppManager {
    pub fn new(store: StateStore, config: &AggregatorConfig) -> Self {
        Self {
            store,
            interval: config.policy_poller_interval(),
            cache_size_per_app: config.metric_cache_size_per_app,
            policies: RwLock::new(HashMap::new()),
            caches: RwLock::new(HashMap::new()),
        }
    }

    /// Run the policy poll loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "app manager started");
        let mut tick = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = tick.tick() => self.refresh(),
                _ = shutdown.changed() => {
                    info!("app manager shutting down");
                    break;
                }
            }
        }
    }

    /// Reload policies from the store and reconcile the cache map.
    ///
    /// A failed poll keeps the previous snapshot (stale but available).
    pub fn refresh(&self) {
        let policies = match self.store.list_policies() {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "policy poll failed, keeping previous snapshot");
                return;
            }
        };
        debug!(count = policies.len(), "policies retrieved");

        let snapshot: PolicyMap = policies
            .into_iter()
            .map(|p| (p.app_id.clone(), Arc::new(p)))
            .collect();

        {
            let mut caches = self.caches.write().unwrap();
            // Drop caches for apps that lost their policy.
            caches.retain(|app_id, _| snapshot.contains_key(app_id));
            for app_id in snapshot.keys() {
                caches.entry(app_id.clone()).or_insert_with(|| {
                    Arc::new(Mutex::new(MetricCache::new(self.cache_size_per_app)))
                });
            }
        }

        *self.policies.write().unwrap() = snapshot;
    }

    /// Current policy snapshot; cheap clone, never blocks on I/O.
    pub fn get_policies(&self) -> PolicyMap {
        self.policies.read().unwrap().clone()
    }

    /// Append an aggregated metric to its app's cache.
    ///
    /// Returns `false` when the app has no cache (no policy).
    pub fn save_metric_to_cache(&self, metric: &AppMetric) -> bool {
        let cache = {
            let caches = self.caches.read().unwrap();
            caches.get(&metric.app_id).cloned()
        };
        match cache {
            Some(cache) => {
                cache.lock().unwrap().put(metric.clone());
                true
            }
            None => false,
        }
    }

    /// Query aggregated metrics in `[start, end]`, cache first.
    ///
    /// `end == -1` means "to now". Falls through to the store when the
    /// cache cannot prove it covers the range.
    pub fn query_app_metrics(
        &self,
        app_id: &str,
        metric_type: &str,
        start: i64,
        end: i64,
        order: Order,
    ) -> StateResult<Vec<AppMetric>> {
        let end = if end < 0 { now_nanos() } else { end };

        let cache = {
            let caches = self.caches.read().unwrap();
            caches.get(app_id).cloned()
        };
        if let Some(cache) = cache {
            // Cache queries are [start, end); ours is inclusive.
            let (mut metrics, hit) = cache.lock().unwrap().query(start, end + 1, metric_type);
            if hit {
                if order == Order::Desc {
                    metrics.reverse();
                }
                return Ok(metrics);
            }
        }
        self.store
            .retrieve_app_metrics(app_id, metric_type, start, end, order)
    }
}

//! Evaluator workers.
//!
//! Each evaluator takes whole trigger batches off the shared channel.
//! For every trigger it queries the aggregated metrics of the breach
//! window and fires a scale request when every sample in the window
//! breaches the rule's threshold. Within one batch only the first
//! breached trigger per (app, metric type) fires; opposing rules on
//! the same metric never both scale in the same tick.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use gridscale_models::{Order, Trigger};

use crate::evaluation_manager::AppEvaluationManager;
use crate::{now_nanos, QueryAppMetricsFn, ScaleFn};

/// Immediate attempts per metric query before the trigger is dropped
/// for the cycle.
const QUERY_ATTEMPTS: u32 = 3;

const NANOS_PER_SEC: i64 = 1_000_000_000;

pub struct Evaluator {
    index: usize,
    trigger_rx: flume::Receiver<Vec<Trigger>>,
    query_metrics: QueryAppMetricsFn,
    scale: ScaleFn,
    manager: Arc<AppEvaluationManager>,
}

impl Evaluator {
    pub fn new(
        index: usize,
        trigger_rx: flume::Receiver<Vec<Trigger>>,
        query_metrics: QueryAppMetricsFn,
        scale: ScaleFn,
        manager: Arc<AppEvaluationManager>,
    ) -> Self {
        Self {
            index,
            trigger_rx,
            query_metrics,
            scale,
            manager,
        }
    }

    /// Consume trigger batches until shutdown or the channel closes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        debug!(evaluator = self.index, "evaluator started");
        loop {
            tokio::select! {
                batch = self.trigger_rx.recv_async() => match batch {
                    Ok(batch) => self.process_batch(batch).await,
                    Err(_) => {
                        warn!(evaluator = self.index, "trigger channel closed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    info!(evaluator = self.index, "evaluator shutting down");
                    break;
                }
            }
        }
    }

    /// Evaluate one tick's batch; the first breached trigger per
    /// (app, metric type) wins.
    pub(crate) async fn process_batch(&self, batch: Vec<Trigger>) {
        let mut fired: HashSet<(String, String)> = HashSet::new();
        for trigger in batch {
            let key = (trigger.app_id.clone(), trigger.metric_type.clone());
            if fired.contains(&key) {
                continue;
            }
            if self.evaluate(trigger).await {
                fired.insert(key);
            }
        }
    }

    /// Returns true when the trigger breached and a scale was
    /// attempted, successful or not.
    async fn evaluate(&self, mut trigger: Trigger) -> bool {
        let now = now_nanos();
        let start = now - trigger.breach_duration_secs * NANOS_PER_SEC;

        let mut metrics = None;
        for attempt in 1..=QUERY_ATTEMPTS {
            match (self.query_metrics)(
                &trigger.app_id,
                &trigger.metric_type,
                start,
                now,
                Order::Asc,
            ) {
                Ok(m) => {
                    metrics = Some(m);
                    break;
                }
                Err(e) => {
                    warn!(
                        app_id = %trigger.app_id,
                        metric_type = %trigger.metric_type,
                        attempt,
                        error = %e,
                        "metric query failed"
                    );
                }
            }
        }
        let Some(metrics) = metrics else {
            warn!(
                app_id = %trigger.app_id,
                metric_type = %trigger.metric_type,
                "metric query retries exhausted, trigger dropped"
            );
            return false;
        };
        if metrics.is_empty() {
            debug!(
                app_id = %trigger.app_id,
                metric_type = %trigger.metric_type,
                "no metrics in breach window"
            );
            return false;
        }

        // Every sample in the window must breach; partial data never
        // fires an alarm.
        let breached = metrics.iter().all(|m| match m.value {
            Some(value) => trigger.operator.breaches(value, trigger.threshold),
            None => false,
        });
        if !breached {
            return false;
        }
        trigger.metric_unit = metrics[0].unit.clone();

        info!(
            app_id = %trigger.app_id,
            metric_type = %trigger.metric_type,
            adjustment = %trigger.adjustment,
            "rule breached, requesting scale"
        );
        let breaker = self.manager.get_breaker(&trigger.app_id);
        let app_id = trigger.app_id.clone();
        let metric_type = trigger.metric_type.clone();
        let cool_down_nanos = trigger.cool_down_secs * NANOS_PER_SEC;
        match (self.scale)(trigger).await {
            Ok(()) => {
                self.manager
                    .set_cool_down_expired(&app_id, &metric_type, now_nanos() + cool_down_nanos);
                breaker.lock().unwrap().record_success();
            }
            Err(e) => {
                warn!(%app_id, %metric_type, error = %e, "scale request failed");
                breaker.lock().unwrap().record_failure(now_nanos());
            }
        }
        true
    }
}

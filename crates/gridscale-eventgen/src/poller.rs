//! Metric poller workers.
//!
//! Each poller pulls app monitors off the shared channel, fetches the
//! raw instance samples for the monitor's window, and reduces them to
//! one aggregated `AppMetric` on the metric channel.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use gridscale_models::{AppInstanceMetric, AppMetric, AppMonitor};

use crate::{now_nanos, FetchMetricsFn};

pub struct MetricPoller {
    index: usize,
    monitor_rx: flume::Receiver<AppMonitor>,
    fetch: FetchMetricsFn,
    metric_tx: mpsc::Sender<AppMetric>,
}

impl MetricPoller {
    pub fn new(
        index: usize,
        monitor_rx: flume::Receiver<AppMonitor>,
        fetch: FetchMetricsFn,
        metric_tx: mpsc::Sender<AppMetric>,
    ) -> Self {
        Self {
            index,
            monitor_rx,
            fetch,
            metric_tx,
        }
    }

    /// Pull monitors until shutdown or the channel closes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        debug!(poller = self.index, "metric poller started");
        loop {
            tokio::select! {
                monitor = self.monitor_rx.recv_async() => match monitor {
                    Ok(monitor) => self.poll(monitor).await,
                    Err(_) => {
                        warn!(poller = self.index, "monitor channel closed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    info!(poller = self.index, "metric poller shutting down");
                    break;
                }
            }
        }
    }

    /// Fetch the monitor's window and emit the aggregate.
    ///
    /// A failed fetch emits nothing; the next execute tick retries the
    /// app anyway.
    async fn poll(&self, monitor: AppMonitor) {
        let end = now_nanos();
        let start = end - monitor.stat_window.as_nanos() as i64;
        let samples = match (self.fetch)(monitor.clone(), start, end).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(
                    app_id = %monitor.app_id,
                    metric_type = %monitor.metric_type,
                    error = %e,
                    "failed to fetch instance metrics"
                );
                return;
            }
        };
        let Some(metric) = aggregate(&monitor, &samples, end) else {
            debug!(
                app_id = %monitor.app_id,
                metric_type = %monitor.metric_type,
                "no parseable samples in window"
            );
            return;
        };
        if self.metric_tx.send(metric).await.is_err() {
            warn!(poller = self.index, "metric channel closed, dropping aggregate");
        }
    }
}

/// Reduce raw instance samples to one per-app metric.
///
/// The value is the ceiling mean of the parseable samples belonging to
/// the monitor's app; an empty window aggregates to nothing.
fn aggregate(
    monitor: &AppMonitor,
    samples: &[AppInstanceMetric],
    timestamp: i64,
) -> Option<AppMetric> {
    let mut sum: i64 = 0;
    let mut count: i64 = 0;
    let mut unit = String::new();
    for sample in samples {
        if sample.app_id != monitor.app_id || sample.name != monitor.metric_type {
            continue;
        }
        let Ok(value) = sample.value.parse::<i64>() else {
            continue;
        };
        if unit.is_empty() {
            unit = sample.unit.clone();
        }
        sum += value;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(AppMetric {
        app_id: monitor.app_id.clone(),
        metric_type: monitor.metric_type.clone(),
        unit,
        value: Some((sum as f64 / count as f64).ceil() as i64),
        timestamp,
    })
}

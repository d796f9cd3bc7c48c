//! gridscale-operator — periodic housekeeping duties.
//!
//! Each duty is an `OperatorTask` driven by an `OperatorRunner` on a
//! fixed interval. Runners are gated on the leadership watch channel
//! published by the lock maintainer: ticks while not leader are
//! skipped, so in a multi-instance deployment each duty runs exactly
//! once per interval cluster-wide.

pub mod pruner;
pub mod sync;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// A periodic housekeeping duty.
#[async_trait]
pub trait OperatorTask: Send + Sync {
    fn name(&self) -> &str;

    async fn operate(&self) -> anyhow::Result<()>;
}

/// Operator daemon settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// How often aggregated metrics are pruned, in seconds.
    pub prune_interval_secs: u64,
    /// Age past which aggregated metrics are pruned, in seconds.
    pub app_metrics_cutoff_secs: u64,
    /// How often schedules are synced to the scheduler, in seconds.
    pub sync_interval_secs: u64,
    /// Base URL of the scheduler.
    pub scheduler_url: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            prune_interval_secs: 3600,
            app_metrics_cutoff_secs: 172_800,
            sync_interval_secs: 600,
            scheduler_url: "http://127.0.0.1:6102".to_string(),
        }
    }
}

impl OperatorConfig {
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    pub fn app_metrics_cutoff(&self) -> Duration {
        Duration::from_secs(self.app_metrics_cutoff_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

/// Drives one task on an interval while this instance is the leader.
pub struct OperatorRunner {
    task: Box<dyn OperatorTask>,
    interval: Duration,
    leadership: watch::Receiver<bool>,
}

impl OperatorRunner {
    pub fn new(
        task: Box<dyn OperatorTask>,
        interval: Duration,
        leadership: watch::Receiver<bool>,
    ) -> Self {
        Self {
            task,
            interval,
            leadership,
        }
    }

    /// Tick until shutdown; non-leader ticks are skipped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            task = self.task.name(),
            interval_secs = self.interval.as_secs(),
            "operator runner started"
        );
        let mut tick = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if !*self.leadership.borrow() {
                        debug!(task = self.task.name(), "not leader, tick skipped");
                        continue;
                    }
                    if let Err(e) = self.task.operate().await {
                        error!(task = self.task.name(), error = %e, "operator task failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!(task = self.task.name(), "operator runner shutting down");
                    break;
                }
            }
        }
    }
}

pub(crate) fn now_nanos() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingTask {
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl OperatorTask for CountingTask {
        fn name(&self) -> &str {
            "counting"
        }

        async fn operate(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn runner_only_operates_while_leader() {
        let runs = Arc::new(AtomicU32::new(0));
        let (leader_tx, leader_rx) = watch::channel(false);
        let runner = OperatorRunner::new(
            Box::new(CountingTask { runs: runs.clone() }),
            Duration::from_millis(10),
            leader_rx,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        // Not leader: no runs accumulate.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        leader_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runs.load(Ordering::SeqCst) > 0);

        // Leadership revoked: counting stops.
        leader_tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let frozen = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), frozen);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn config_defaults() {
        let cfg = OperatorConfig::default();
        assert_eq!(cfg.prune_interval(), Duration::from_secs(3600));
        assert_eq!(cfg.app_metrics_cutoff(), Duration::from_secs(172_800));
        assert_eq!(cfg.sync_interval(), Duration::from_secs(600));
    }
}

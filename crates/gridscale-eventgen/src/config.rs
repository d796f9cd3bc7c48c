//! Configuration structs for the event-generation pipeline.
//!
//! Deserialized from the daemon's config file; every field has a
//! default so a minimal config still runs.

use std::time::Duration;

use serde::Deserialize;

/// Aggregator and metric-poller settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// How often the AppManager reloads policies, in seconds.
    pub policy_poller_interval_secs: u64,
    /// How often app monitors are scheduled, in seconds.
    pub aggregator_execute_interval_secs: u64,
    /// How often the aggregated-metric batch is flushed, in seconds.
    pub save_interval_secs: u64,
    /// Number of metric-poller workers.
    pub metric_poller_count: usize,
    /// Capacity of the app-monitor channel.
    pub app_monitor_channel_size: usize,
    /// Capacity of the app-metric channel.
    pub app_metric_channel_size: usize,
    /// Ring-buffer capacity of the per-app metric cache.
    pub metric_cache_size_per_app: usize,
    /// Fallback stat window for rules that don't set one, in seconds.
    pub default_stat_window_secs: i64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            policy_poller_interval_secs: 40,
            aggregator_execute_interval_secs: 40,
            save_interval_secs: 5,
            metric_poller_count: 20,
            app_monitor_channel_size: 200,
            app_metric_channel_size: 200,
            metric_cache_size_per_app: 100,
            default_stat_window_secs: 120,
        }
    }
}

impl AggregatorConfig {
    pub fn policy_poller_interval(&self) -> Duration {
        Duration::from_secs(self.policy_poller_interval_secs)
    }

    pub fn execute_interval(&self) -> Duration {
        Duration::from_secs(self.aggregator_execute_interval_secs)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
}

/// Evaluation-manager and evaluator-pool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// How often due rules are turned into triggers, in seconds.
    pub evaluation_manager_interval_secs: u64,
    /// Number of evaluator workers.
    pub evaluator_count: usize,
    /// Capacity of the trigger-batch channel.
    pub trigger_channel_size: usize,
    /// Fallback stat window for rules that don't set one, in seconds.
    pub default_stat_window_secs: i64,
    /// Fallback breach duration for rules that don't set one, in seconds.
    pub default_breach_duration_secs: i64,
    /// Fallback cool-down for rules that don't set one, in seconds.
    pub default_cool_down_secs: i64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            evaluation_manager_interval_secs: 40,
            evaluator_count: 20,
            trigger_channel_size: 200,
            default_stat_window_secs: 120,
            default_breach_duration_secs: 120,
            default_cool_down_secs: 300,
        }
    }
}

impl EvaluatorConfig {
    pub fn manager_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_manager_interval_secs)
    }
}

/// Per-app circuit breaker bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub consecutive_failure_threshold: u32,
    /// First open-state backoff, in seconds.
    pub initial_backoff_secs: u64,
    /// Backoff cap, in seconds.
    pub max_backoff_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            consecutive_failure_threshold: 3,
            initial_backoff_secs: 30,
            max_backoff_secs: 600,
        }
    }
}

impl BreakerConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_secs(self.initial_backoff_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg: AggregatorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.metric_poller_count, 20);
        assert_eq!(cfg.execute_interval(), Duration::from_secs(40));
    }

    #[test]
    fn fields_override_defaults() {
        let cfg: EvaluatorConfig =
            serde_json::from_str(r#"{"evaluator_count": 5, "trigger_channel_size": 10}"#).unwrap();
        assert_eq!(cfg.evaluator_count, 5);
        assert_eq!(cfg.trigger_channel_size, 10);
        assert_eq!(cfg.default_breach_duration_secs, 120);
    }
}

//! gridscale-eventgen — the event-generation pipeline.
//!
//! Polls scaling policies, fans app-monitor work out to metric pollers,
//! aggregates raw instance samples into per-app metrics, and evaluates
//! policy rules against aggregated windows, calling the Scaling Engine
//! when a rule is continuously breached.
//!
//! Pipeline: `AppManager` → `Aggregator` (app-monitor channel) →
//! `MetricPoller` (app-metric channel) → cache + store;
//! `AppEvaluationManager` (trigger channel) → `Evaluator` → Scaling
//! Engine. All channels are bounded; full channels block producers
//! rather than dropping work.

pub mod aggregator;
pub mod app_manager;
pub mod breaker;
pub mod cache;
pub mod clients;
pub mod config;
pub mod evaluation_manager;
pub mod evaluator;
pub mod poller;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use gridscale_models::{AppInstanceMetric, AppMetric, AppMonitor, Order, Policy, Trigger};

/// Boxed future used by the async callback seams below.
pub type BoxFuture<T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// Returns the current policy snapshot keyed by app id.
pub type GetPoliciesFn =
    Arc<dyn Fn() -> std::collections::HashMap<String, Arc<Policy>> + Send + Sync>;

/// Mirrors an aggregated metric into the in-memory cache; `false` when
/// the app has no cache (no policy).
pub type SaveToCacheFn = Arc<dyn Fn(&AppMetric) -> bool + Send + Sync>;

/// Queries aggregated metrics (cache-or-store) for one app/metric type.
pub type QueryAppMetricsFn = Arc<
    dyn Fn(&str, &str, i64, i64, Order) -> Result<Vec<AppMetric>, gridscale_state::StateError>
        + Send
        + Sync,
>;

/// Fetches raw instance metric history for `[start, end]` (unix nanos).
pub type FetchMetricsFn = Arc<
    dyn Fn(AppMonitor, i64, i64) -> BoxFuture<Result<Vec<AppInstanceMetric>, clients::ClientError>>
        + Send
        + Sync,
>;

/// Posts a breached trigger to the Scaling Engine.
pub type ScaleFn =
    Arc<dyn Fn(Trigger) -> BoxFuture<Result<(), clients::ClientError>> + Send + Sync>;

pub(crate) fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

//! gridscale-api — read API for aggregated metric histories.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/v1/apps/{app_id}/aggregated_metric_histories/{metric_type}` | Aggregated metric history |
//! | GET | `/health` | Liveness probe |

pub mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use gridscale_models::{AppMetric, Order};
use gridscale_state::StateError;

/// Callback resolving an aggregated-metric range query; wired to the
/// AppManager's cache-or-store lookup.
pub type QueryMetricsFn =
    Arc<dyn Fn(&str, &str, i64, i64, Order) -> Result<Vec<AppMetric>, StateError> + Send + Sync>;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub query_metrics: QueryMetricsFn,
}

/// Build the read-API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/v1/apps/{app_id}/aggregated_metric_histories/{metric_type}",
            get(handlers::aggregated_metric_histories),
        )
        .route("/health", get(handlers::health))
        .with_state(state)
}

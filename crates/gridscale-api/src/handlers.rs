//! Read-API handlers.
//!
//! The query string is parsed by hand: callers supplying the same
//! parameter twice must get a 400, which the typed extractors cannot
//! detect (they keep the first or last value silently).

use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use gridscale_models::Order;

use crate::ApiState;

/// Error body returned on 4xx/5xx.
#[derive(serde::Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

fn bad_request(param: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            code: "Bad-Request",
            message: format!("Incorrect {param} parameter in query string"),
        }),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            code: "Internal-Server-Error",
            message: "failed to query aggregated metrics".to_string(),
        }),
    )
        .into_response()
}

/// Parsed query parameters with their defaults applied.
#[derive(Debug)]
struct HistoryQuery {
    start: i64,
    end: i64,
    order: Order,
}

/// Parse `start`, `end` and `order`, rejecting duplicates; returns the
/// offending parameter name on error.
fn parse_history_query(raw: Option<&str>) -> Result<HistoryQuery, &'static str> {
    let mut start: Option<&str> = None;
    let mut end: Option<&str> = None;
    let mut order: Option<&str> = None;

    for pair in raw.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let slot = match name {
            "start" => &mut start,
            "end" => &mut end,
            "order" => &mut order,
            _ => continue,
        };
        if slot.replace(value).is_some() {
            return Err(match name {
                "start" => "start",
                "end" => "end",
                _ => "order",
            });
        }
    }

    let start = match start {
        Some(v) => v.parse::<i64>().map_err(|_| "start")?,
        None => 0,
    };
    let end = match end {
        Some(v) => v.parse::<i64>().map_err(|_| "end")?,
        None => -1,
    };
    let order = match order {
        Some(v) => v.parse::<Order>().map_err(|_| "order")?,
        None => Order::Asc,
    };
    Ok(HistoryQuery { start, end, order })
}

/// GET /v1/apps/{app_id}/aggregated_metric_histories/{metric_type}
pub async fn aggregated_metric_histories(
    State(state): State<ApiState>,
    Path((app_id, metric_type)): Path<(String, String)>,
    RawQuery(raw): RawQuery,
) -> Response {
    let query = match parse_history_query(raw.as_deref()) {
        Ok(q) => q,
        Err(param) => return bad_request(param),
    };
    match (state.query_metrics)(&app_id, &metric_type, query.start, query.end, query.order) {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => {
            error!(%app_id, %metric_type, error = %e, "aggregated metric query failed");
            internal_error()
        }
    }
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

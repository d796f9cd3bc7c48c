//! HTTP clients for the metrics backend and the Scaling Engine.
//!
//! Plain http1 connections (TCP connect + hyper handshake, connection
//! driven on a spawned task) with an overall per-call timeout. Non-2xx
//! responses carry the backend's `{code, message}` error body when one
//! is present.

use std::sync::Arc;
use std::time::Duration;

use http_body_util::BodyExt;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use gridscale_models::{AppInstanceMetric, Trigger};

use crate::{BoxFuture, FetchMetricsFn, ScaleFn};

/// Errors from a backend HTTP call.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    #[error("http handshake failed: {0}")]
    Handshake(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend returned {status}: {code} {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },

    #[error("failed to decode response body: {0}")]
    Decode(String),
}

/// Error body shape returned by the backends on non-2xx.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Issue one http1 request against `address` (host:port) and collect
/// the response body.
async fn http_call(
    address: &str,
    req: http::Request<http_body_util::Full<bytes::Bytes>>,
    timeout: Duration,
) -> Result<(http::StatusCode, bytes::Bytes), ClientError> {
    let address = address.to_string();
    let call = async {
        let stream = tokio::net::TcpStream::connect(&address)
            .await
            .map_err(|source| ClientError::Connect {
                address: address.clone(),
                source,
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ClientError::Handshake(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?
            .to_bytes();
        Ok((status, body))
    };

    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout(timeout)),
    }
}

fn status_error(status: http::StatusCode, body: &[u8]) -> ClientError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or(ErrorBody {
        code: String::new(),
        message: String::new(),
    });
    ClientError::Status {
        status: status.as_u16(),
        code: parsed.code,
        message: parsed.message,
    }
}

/// Strip an `http://` scheme down to `host:port`.
fn host_of(url: &str) -> &str {
    let rest = url.strip_prefix("http://").unwrap_or(url);
    rest.split('/').next().unwrap_or(rest)
}

// ── Metrics backend ────────────────────────────────────────────────

/// Client for the metrics backend's instance-metric history API.
pub struct MetricsClient {
    base_url: String,
    timeout: Duration,
}

impl MetricsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }

    /// GET `/v1/apps/{app_id}/metrics_history/{metric_type}` for
    /// `[start, end]` (unix nanos).
    pub async fn metrics_history(
        &self,
        app_id: &str,
        metric_type: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<AppInstanceMetric>, ClientError> {
        let address = host_of(&self.base_url);
        let uri = format!(
            "{}/v1/apps/{app_id}/metrics_history/{metric_type}?start={start}&end={end}&order=asc",
            self.base_url
        );
        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("accept", "application/json")
            .body(http_body_util::Full::new(bytes::Bytes::new()))
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let (status, body) = http_call(address, req, self.timeout).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        let samples: Vec<AppInstanceMetric> =
            serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))?;
        debug!(%app_id, %metric_type, count = samples.len(), "metrics history fetched");
        Ok(samples)
    }
}

/// Adapt a `MetricsClient` to the poller's fetch callback.
pub fn fetch_metrics_fn(client: Arc<MetricsClient>) -> FetchMetricsFn {
    Arc::new(move |monitor, start, end| -> BoxFuture<_> {
        let client = client.clone();
        Box::pin(async move {
            client
                .metrics_history(&monitor.app_id, &monitor.metric_type, start, end)
                .await
        })
    })
}

// ── Scaling Engine ─────────────────────────────────────────────────

/// Client for the Scaling Engine's scale endpoint.
pub struct ScalingClient {
    base_url: String,
    timeout: Duration,
}

impl ScalingClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }

    /// POST the breached trigger to `/v1/apps/{app_id}/scale`.
    /// Any 2xx means the scale request was accepted.
    pub async fn scale(&self, trigger: &Trigger) -> Result<(), ClientError> {
        let address = host_of(&self.base_url);
        let uri = format!("{}/v1/apps/{}/scale", self.base_url, trigger.app_id);
        let payload =
            serde_json::to_vec(trigger).map_err(|e| ClientError::Request(e.to_string()))?;
        let req = http::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("host", address)
            .header("content-type", "application/json")
            .body(http_body_util::Full::new(bytes::Bytes::from(payload)))
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let (status, body) = http_call(address, req, self.timeout).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        debug!(app_id = %trigger.app_id, adjustment = %trigger.adjustment, "scale request accepted");
        Ok(())
    }
}

/// Adapt a `ScalingClient` to the evaluator's scale callback.
pub fn scale_fn(client: Arc<ScalingClient>) -> ScaleFn {
    Arc::new(move |trigger| -> BoxFuture<_> {
        let client = client.clone();
        Box::pin(async move { client.scale(&trigger).await })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_strips_scheme_and_path() {
        assert_eq!(host_of("http://127.0.0.1:8080"), "127.0.0.1:8080");
        assert_eq!(host_of("http://metrics:7103/v1"), "metrics:7103");
        assert_eq!(host_of("metrics:7103"), "metrics:7103");
    }

    #[test]
    fn status_error_decodes_backend_body() {
        let err = status_error(
            http::StatusCode::BAD_REQUEST,
            br#"{"code":"Bad-Request","message":"Incorrect start parameter in query string"}"#,
        );
        match err {
            ClientError::Status {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, "Bad-Request");
                assert_eq!(message, "Incorrect start parameter in query string");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn status_error_tolerates_unstructured_body() {
        let err = status_error(http::StatusCode::INTERNAL_SERVER_ERROR, b"boom");
        match err {
            ClientError::Status { status, code, .. } => {
                assert_eq!(status, 500);
                assert_eq!(code, "");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn connect_failure_surfaces_as_error() {
        // Port 1 on localhost is almost certainly closed.
        let client = MetricsClient::new("http://127.0.0.1:1", Duration::from_secs(1));
        let err = client
            .metrics_history("app-1", "memoryused", 0, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Connect { .. } | ClientError::Timeout(_)
        ));
    }
}

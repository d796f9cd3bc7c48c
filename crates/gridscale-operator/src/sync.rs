//! Schedule synchronization.
//!
//! Tells the scheduler to reconcile its schedules against the current
//! policies. The HTTP call comes in through a boxed async callback so
//! tests substitute a recorder for a live scheduler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use http_body_util::BodyExt;
use hyper_util::rt::TokioIo;
use tracing::debug;

use crate::OperatorTask;

pub type BoxFuture<T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// Posts a sync request to the scheduler.
pub type SyncSchedulesFn = Arc<dyn Fn() -> BoxFuture<anyhow::Result<()>> + Send + Sync>;

pub struct ScheduleSynchronizer {
    sync: SyncSchedulesFn,
}

impl ScheduleSynchronizer {
    pub fn new(sync: SyncSchedulesFn) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl OperatorTask for ScheduleSynchronizer {
    fn name(&self) -> &str {
        "schedule-synchronizer"
    }

    async fn operate(&self) -> anyhow::Result<()> {
        (self.sync)().await?;
        debug!("schedules synced");
        Ok(())
    }
}

/// HTTP client for the scheduler's sync endpoint.
pub struct SchedulerClient {
    base_url: String,
    timeout: Duration,
}

impl SchedulerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }

    /// POST `/v1/syncSchedules`; any 2xx counts as synced.
    pub async fn sync_schedules(&self) -> anyhow::Result<()> {
        let address = self
            .base_url
            .strip_prefix("http://")
            .unwrap_or(&self.base_url)
            .split('/')
            .next()
            .unwrap_or(&self.base_url)
            .to_string();
        let uri = format!("{}/v1/syncSchedules", self.base_url);
        let req = http::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("host", &address)
            .body(http_body_util::Full::new(bytes::Bytes::new()))?;

        let call = async {
            let stream = tokio::net::TcpStream::connect(&address)
                .await
                .with_context(|| format!("connect to {address}"))?;
            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
            tokio::spawn(async move {
                let _ = conn.await;
            });
            let resp = sender.send_request(req).await?;
            let status = resp.status();
            let _ = resp.into_body().collect().await?;
            if !status.is_success() {
                bail!("scheduler returned {status}");
            }
            Ok(())
        };
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| anyhow::anyhow!("sync request timed out after {:?}", self.timeout))?
    }
}

/// Adapt a `SchedulerClient` to the synchronizer's callback.
pub fn sync_schedules_fn(client: Arc<SchedulerClient>) -> SyncSchedulesFn {
    Arc::new(move || -> BoxFuture<_> {
        let client = client.clone();
        Box::pin(async move { client.sync_schedules().await })
    })
}

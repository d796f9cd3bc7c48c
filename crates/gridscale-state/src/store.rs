//! StateStore — redb-backed persistence for policies and app metrics.
//!
//! Provides typed CRUD over policy documents and time-range queries
//! over aggregated app metrics. Supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use gridscale_models::{AppMetric, Order, Policy};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Composite key for the app-metrics table.
fn metric_key(app_id: &str, metric_type: &str, timestamp: i64) -> String {
    format!("{app_id}:{metric_type}:{timestamp:020}")
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POLICIES).map_err(map_err!(Table))?;
        txn.open_table(APP_METRICS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Policies ───────────────────────────────────────────────────

    /// Insert or update a policy document.
    pub fn put_policy(&self, policy: &Policy) -> StateResult<()> {
        let value = serde_json::to_vec(policy).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            table
                .insert(policy.app_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(app_id = %policy.app_id, "policy stored");
        Ok(())
    }

    /// Get a policy by app id.
    pub fn get_policy(&self, app_id: &str) -> StateResult<Option<Policy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        match table.get(app_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let policy: Policy =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(policy))
            }
            None => Ok(None),
        }
    }

    /// List all policies.
    pub fn list_policies(&self) -> StateResult<Vec<Policy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let policy: Policy =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(policy);
        }
        Ok(results)
    }

    /// Delete a policy by app id. Returns true if it existed.
    pub fn delete_policy(&self, app_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            existed = table.remove(app_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%app_id, existed, "policy deleted");
        Ok(existed)
    }

    // ── App metrics ────────────────────────────────────────────────

    /// Insert one aggregated app metric.
    pub fn save_app_metric(&self, metric: &AppMetric) -> StateResult<()> {
        self.save_app_metrics(std::slice::from_ref(metric))
    }

    /// Insert a batch of aggregated app metrics in one write transaction.
    pub fn save_app_metrics(&self, metrics: &[AppMetric]) -> StateResult<()> {
        if metrics.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(APP_METRICS).map_err(map_err!(Table))?;
            for metric in metrics {
                let key = metric_key(&metric.app_id, &metric.metric_type, metric.timestamp);
                let value = serde_json::to_vec(metric).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = metrics.len(), "app metrics stored");
        Ok(())
    }

    /// Retrieve app metrics in `[start, end]` for one app/metric type.
    ///
    /// `end == -1` means "to now" (no upper bound). Results are sorted
    /// by timestamp per `order`; an empty range is not an error.
    pub fn retrieve_app_metrics(
        &self,
        app_id: &str,
        metric_type: &str,
        start: i64,
        end: i64,
        order: Order,
    ) -> StateResult<Vec<AppMetric>> {
        let upper = if end < 0 { i64::MAX } else { end };
        let low = metric_key(app_id, metric_type, start.max(0));
        let high = metric_key(app_id, metric_type, upper);

        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APP_METRICS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        let range = table
            .range(low.as_str()..=high.as_str())
            .map_err(map_err!(Read))?;
        for entry in range {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let metric: AppMetric =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(metric);
        }
        if order == Order::Desc {
            results.reverse();
        }
        Ok(results)
    }

    /// Delete all app metrics with `timestamp < before`. Returns the
    /// number of rows removed.
    pub fn prune_app_metrics(&self, before: i64) -> StateResult<u64> {
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(APP_METRICS).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let metric: AppMetric =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if metric.timestamp < before {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u64;
        {
            let mut table = txn.open_table(APP_METRICS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count, before, "app metrics pruned");
        Ok(count)
    }
}

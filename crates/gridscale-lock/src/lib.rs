//! gridscale-lock — database-backed leader election.
//!
//! Operator daemons run in multiple instances for availability but
//! their duties (pruning, schedule sync) must run exactly once. A
//! single-row lease table in Postgres decides the leader: whoever
//! holds an unexpired row owns the duties. Expiry is measured against
//! the *database's* clock, so competitors never need synchronized
//! process clocks.

mod maintainer;
mod mem;
mod pg;

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use gridscale_models::Lock;

pub use maintainer::{try_lock, LockMaintainer};
pub use mem::MemLockStore;
pub use pg::PgLockStore;

/// Errors from the lock store.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock store error: {0}")]
    Store(String),

    /// The lock row is locked by a concurrent transaction; back off
    /// and retry next interval.
    #[error("lock row held by a concurrent transaction")]
    Contended,
}

/// Storage primitives the lease protocol is built on.
///
/// Correctness rests entirely on the store's conditional writes:
/// `acquire` must fail when a row exists, `renew`/`release` only touch
/// rows matching the owner.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// The current lock row, if any.
    async fn fetch(&self) -> Result<Option<Lock>, LockError>;

    /// Insert the lock row stamped with the store's clock; fails when
    /// a row already exists.
    async fn acquire(&self, lock: &Lock) -> Result<(), LockError>;

    /// Re-stamp the row owned by `owner` with the store's clock.
    async fn renew(&self, owner: &str) -> Result<(), LockError>;

    /// Delete the row owned by `owner`; a no-op when absent.
    async fn release(&self, owner: &str) -> Result<(), LockError>;

    /// The store's clock (unix seconds). All expiry decisions use this,
    /// never the process clock.
    async fn timestamp(&self) -> Result<i64, LockError>;
}

/// Lock settings for the operator daemon.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Postgres URL of the lock database.
    pub url: String,
    /// Lease time-to-live, in seconds.
    pub ttl_secs: u64,
    /// How often to acquire/renew, in seconds.
    pub retry_interval_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/gridscale_lock".to_string(),
            ttl_secs: 15,
            retry_interval_secs: 5,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// Guid identifying this process as a lock owner.
pub fn generate_owner() -> String {
    uuid::Uuid::new_v4().to_string()
}

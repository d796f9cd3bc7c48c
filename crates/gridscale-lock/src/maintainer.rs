//! Lease competition and maintenance.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use gridscale_models::Lock;

use crate::{LockError, LockStore};

/// One round of the lease competition.
///
/// Returns `Ok(true)` when this owner holds the lease afterwards,
/// `Ok(false)` when someone else holds a live lease (standby).
pub async fn try_lock(store: &dyn LockStore, lock: &Lock) -> Result<bool, LockError> {
    match store.fetch().await? {
        None => {
            debug!(owner = %lock.owner, "no one holds the lock");
            store.acquire(lock).await?;
            Ok(true)
        }
        Some(held) if held.owner == lock.owner => {
            store.renew(&lock.owner).await?;
            debug!(owner = %lock.owner, "lock renewed");
            Ok(true)
        }
        Some(held) => {
            let now = store.timestamp().await?;
            if held.expired_at(now) {
                info!(previous_owner = %held.owner, "lock lease expired, taking over");
                store.release(&held.owner).await?;
                store.acquire(lock).await?;
                Ok(true)
            } else {
                debug!(holder = %held.owner, "lock still valid, standing by");
                Ok(false)
            }
        }
    }
}

/// Competes for the lease on an interval and publishes leadership on a
/// watch channel. Gated duties subscribe to the receiver and run only
/// while it reads `true`.
pub struct LockMaintainer {
    store: Arc<dyn LockStore>,
    lock: Lock,
    retry_interval: Duration,
    leadership: watch::Sender<bool>,
}

impl LockMaintainer {
    pub fn new(
        store: Arc<dyn LockStore>,
        owner: String,
        ttl: Duration,
        retry_interval: Duration,
    ) -> (Self, watch::Receiver<bool>) {
        let (leadership, rx) = watch::channel(false);
        (
            Self {
                store,
                lock: Lock {
                    owner,
                    last_modified_timestamp: 0,
                    ttl,
                },
                retry_interval,
                leadership,
            },
            rx,
        )
    }

    /// Run the acquire/renew loop until shutdown, then release the
    /// lease best-effort (lease expiry covers a failed release).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            owner = %self.lock.owner,
            ttl_secs = self.lock.ttl.as_secs(),
            retry_secs = self.retry_interval.as_secs(),
            "lock maintainer started"
        );
        let mut first_attempt = true;
        let mut tick = tokio::time::interval(self.retry_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.compete(first_attempt).await;
                    first_attempt = false;
                }
                _ = shutdown.changed() => {
                    info!(owner = %self.lock.owner, "lock maintainer shutting down");
                    break;
                }
            }
        }
        let _ = self.leadership.send(false);
        match tokio::time::timeout(
            Duration::from_secs(5),
            self.store.release(&self.lock.owner),
        )
        .await
        {
            Ok(Ok(())) => info!(owner = %self.lock.owner, "lock released"),
            Ok(Err(e)) => warn!(owner = %self.lock.owner, error = %e, "failed to release lock"),
            Err(_) => warn!(owner = %self.lock.owner, "lock release timed out"),
        }
    }

    async fn compete(&self, first_attempt: bool) {
        let was_leader = *self.leadership.borrow();
        match try_lock(self.store.as_ref(), &self.lock).await {
            Ok(true) => {
                if !was_leader {
                    if first_attempt {
                        info!(owner = %self.lock.owner, "lock acquired in first attempt");
                    } else {
                        info!(owner = %self.lock.owner, "lock acquired");
                    }
                    let _ = self.leadership.send(true);
                }
            }
            Ok(false) => {
                if was_leader {
                    warn!(owner = %self.lock.owner, "lost the lock to another owner");
                    let _ = self.leadership.send(false);
                }
            }
            Err(e) => {
                if was_leader {
                    warn!(owner = %self.lock.owner, error = %e, "lock renewal failed, revoking leadership");
                    let _ = self.leadership.send(false);
                } else {
                    debug!(owner = %self.lock.owner, error = %e, "lock attempt failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::MemLockStore;

    fn lock(owner: &str, ttl_secs: u64) -> Lock {
        Lock {
            owner: owner.to_string(),
            last_modified_timestamp: 0,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    #[tokio::test]
    async fn acquires_when_no_one_holds_the_lock() {
        let store = MemLockStore::new();
        assert!(try_lock(&store, &lock("guid-a", 15)).await.unwrap());
        assert_eq!(store.fetch().await.unwrap().unwrap().owner, "guid-a");
    }

    #[tokio::test]
    async fn renews_its_own_lease() {
        let store = MemLockStore::new();
        store.set_now(10);
        assert!(try_lock(&store, &lock("guid-a", 15)).await.unwrap());
        store.set_now(20);
        assert!(try_lock(&store, &lock("guid-a", 15)).await.unwrap());
        assert_eq!(
            store.fetch().await.unwrap().unwrap().last_modified_timestamp,
            20
        );
    }

    #[tokio::test]
    async fn stands_by_while_another_lease_is_live() {
        let store = MemLockStore::new();
        store.set_now(10);
        assert!(try_lock(&store, &lock("guid-a", 15)).await.unwrap());
        store.set_now(20);
        assert!(!try_lock(&store, &lock("guid-b", 15)).await.unwrap());
        assert_eq!(store.fetch().await.unwrap().unwrap().owner, "guid-a");
    }

    #[tokio::test]
    async fn takes_over_an_expired_lease() {
        let store = MemLockStore::new();
        store.set_now(10);
        assert!(try_lock(&store, &lock("guid-a", 15)).await.unwrap());
        // 10 + 15 < 26: expired.
        store.set_now(26);
        assert!(try_lock(&store, &lock("guid-b", 15)).await.unwrap());
        assert_eq!(store.fetch().await.unwrap().unwrap().owner, "guid-b");
    }

    #[tokio::test]
    async fn competing_owners_are_mutually_exclusive() {
        let store = MemLockStore::new();
        store.set_now(10);
        let a = try_lock(&store, &lock("guid-a", 15)).await.unwrap();
        let b = try_lock(&store, &lock("guid-b", 15)).await.unwrap();
        assert!(a ^ b);
    }

    #[tokio::test]
    async fn maintainer_grants_and_revokes_leadership() {
        let store = Arc::new(MemLockStore::new());
        let (maintainer, mut leadership) = LockMaintainer::new(
            store.clone(),
            "guid-a".to_string(),
            Duration::from_secs(15),
            Duration::from_millis(10),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(maintainer.run(shutdown_rx));

        leadership.changed().await.unwrap();
        assert!(*leadership.borrow());

        // Renewal failures must revoke leadership.
        store.set_failing(true);
        leadership.changed().await.unwrap();
        assert!(!*leadership.borrow());

        store.set_failing(false);
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn maintainer_releases_the_lease_on_shutdown() {
        let store = Arc::new(MemLockStore::new());
        let (maintainer, mut leadership) = LockMaintainer::new(
            store.clone(),
            "guid-a".to_string(),
            Duration::from_secs(15),
            Duration::from_millis(10),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(maintainer.run(shutdown_rx));

        leadership.changed().await.unwrap();
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(store.fetch().await.unwrap().is_none());
        assert!(!*leadership.borrow());
    }
}

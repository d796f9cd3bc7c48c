//! In-memory lock store with the same conditional-write semantics as
//! the Postgres store and a controllable clock, for tests.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use gridscale_models::Lock;

use crate::{LockError, LockStore};

#[derive(Default)]
pub struct MemLockStore {
    row: Mutex<Option<Lock>>,
    now: AtomicI64,
    failing: AtomicBool,
}

impl MemLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the store clock (unix seconds).
    pub fn set_now(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Make every operation fail until cleared, to exercise renewal
    /// failures.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), LockError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(LockError::Store("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LockStore for MemLockStore {
    async fn fetch(&self) -> Result<Option<Lock>, LockError> {
        self.check()?;
        Ok(self.row.lock().unwrap().clone())
    }

    async fn acquire(&self, lock: &Lock) -> Result<(), LockError> {
        self.check()?;
        let mut row = self.row.lock().unwrap();
        if row.is_some() {
            return Err(LockError::Contended);
        }
        *row = Some(Lock {
            owner: lock.owner.clone(),
            last_modified_timestamp: self.now.load(Ordering::SeqCst),
            ttl: lock.ttl,
        });
        Ok(())
    }

    async fn renew(&self, owner: &str) -> Result<(), LockError> {
        self.check()?;
        let mut row = self.row.lock().unwrap();
        match row.as_mut() {
            Some(held) if held.owner == owner => {
                held.last_modified_timestamp = self.now.load(Ordering::SeqCst);
                Ok(())
            }
            _ => Err(LockError::Store("lock row no longer owned".to_string())),
        }
    }

    async fn release(&self, owner: &str) -> Result<(), LockError> {
        self.check()?;
        let mut row = self.row.lock().unwrap();
        if matches!(row.as_ref(), Some(held) if held.owner == owner) {
            *row = None;
        }
        Ok(())
    }

    async fn timestamp(&self) -> Result<i64, LockError> {
        self.check()?;
        Ok(self.now.load(Ordering::SeqCst))
    }
}

//! Postgres lock store.
//!
//! Single-row `locks` table. `acquire` runs inside a transaction that
//! first takes `SELECT ... FOR UPDATE NOWAIT` over the table, so two
//! competitors can never both observe "no row" and both insert; the
//! loser surfaces `LockError::Contended` and retries next interval.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::debug;

use gridscale_models::Lock;

use crate::{LockError, LockStore};

/// Postgres error code for a `NOWAIT` row-lock conflict.
const LOCK_NOT_AVAILABLE: &str = "55P03";

pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    /// Connect and make sure the `locks` table exists.
    pub async fn connect(url: &str) -> Result<Self, LockError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(url)
            .await
            .map_err(wrap)?;
        let store = Self { pool };
        store.ensure_table().await?;
        Ok(store)
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_table(&self) -> Result<(), LockError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS locks (\
                owner TEXT PRIMARY KEY,\
                lock_timestamp TIMESTAMPTZ NOT NULL,\
                ttl BIGINT NOT NULL)",
        )
        .execute(&self.pool)
        .await
        .map_err(wrap)?;
        Ok(())
    }
}

fn wrap(e: sqlx::Error) -> LockError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(LOCK_NOT_AVAILABLE) {
            return LockError::Contended;
        }
    }
    LockError::Store(e.to_string())
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn fetch(&self) -> Result<Option<Lock>, LockError> {
        let row = sqlx::query_as::<_, (String, i64, i64)>(
            "SELECT owner, EXTRACT(EPOCH FROM lock_timestamp)::BIGINT, ttl FROM locks LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(wrap)?;
        Ok(row.map(|(owner, last_modified_timestamp, ttl)| Lock {
            owner,
            last_modified_timestamp,
            ttl: Duration::from_secs(ttl.max(0) as u64),
        }))
    }

    async fn acquire(&self, lock: &Lock) -> Result<(), LockError> {
        let mut tx = self.pool.begin().await.map_err(wrap)?;
        // Serialize competitors on the existing row (if any) before
        // deciding to insert.
        sqlx::query("SELECT owner FROM locks LIMIT 1 FOR UPDATE NOWAIT")
            .fetch_optional(&mut *tx)
            .await
            .map_err(wrap)?;
        let inserted = sqlx::query(
            "INSERT INTO locks (owner, lock_timestamp, ttl) \
             SELECT $1, NOW(), $2 WHERE NOT EXISTS (SELECT 1 FROM locks)",
        )
        .bind(&lock.owner)
        .bind(lock.ttl.as_secs() as i64)
        .execute(&mut *tx)
        .await
        .map_err(wrap)?;
        if inserted.rows_affected() == 0 {
            return Err(LockError::Contended);
        }
        tx.commit().await.map_err(wrap)?;
        debug!(owner = %lock.owner, "lock row inserted");
        Ok(())
    }

    async fn renew(&self, owner: &str) -> Result<(), LockError> {
        let updated = sqlx::query("UPDATE locks SET lock_timestamp = NOW() WHERE owner = $1")
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(wrap)?;
        if updated.rows_affected() == 0 {
            return Err(LockError::Store("lock row no longer owned".to_string()));
        }
        Ok(())
    }

    async fn release(&self, owner: &str) -> Result<(), LockError> {
        sqlx::query("DELETE FROM locks WHERE owner = $1")
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(wrap)?;
        Ok(())
    }

    async fn timestamp(&self) -> Result<i64, LockError> {
        let (now,): (i64,) = sqlx::query_as("SELECT EXTRACT(EPOCH FROM NOW())::BIGINT")
            .fetch_one(&self.pool)
            .await
            .map_err(wrap)?;
        Ok(now)
    }
}

//! The database-lock row.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One row of the lock table: the current leaseholder.
///
/// The lease is valid until `last_modified_timestamp + ttl` as measured
/// by the *store's* clock; competitors treat an unrenewed lease past
/// that point as expired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lock {
    /// Guid of the instance holding the lease.
    pub owner: String,
    /// Last acquire/renew time (unix seconds, store clock).
    pub last_modified_timestamp: i64,
    pub ttl: Duration,
}

impl Lock {
    /// Whether the lease has expired at `now` (store clock, unix seconds).
    pub fn expired_at(&self, now: i64) -> bool {
        self.last_modified_timestamp + (self.ttl.as_secs() as i64) < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_expiry_boundary() {
        let lock = Lock {
            owner: "guid-a".to_string(),
            last_modified_timestamp: 100,
            ttl: Duration::from_secs(30),
        };
        assert!(!lock.expired_at(129));
        assert!(!lock.expired_at(130));
        assert!(lock.expired_at(131));
    }
}

//! Leader lease and fencing token types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Parameters for contending on a lease row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseConfig {
    pub lease_name: String,
    pub holder_id: String,
    pub duration: Duration,
}

impl LeaseConfig {
    pub fn new(
        lease_name: impl Into<String>,
        holder_id: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            lease_name: lease_name.into(),
            holder_id: holder_id.into(),
            duration,
        }
    }
}

/// The persisted lease row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub lease_name: String,
    pub holder_id: String,
    /// Incremented on every acquisition; doubles as the fencing token.
    pub lease_epoch: u64,
    pub acquired_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Fence for writes made under this lease.
    pub fn fence(&self) -> LeaseFence {
        LeaseFence {
            lease_name: self.lease_name.clone(),
            holder_id: self.holder_id.clone(),
            lease_epoch: self.lease_epoch,
        }
    }
}

/// The (holder, epoch) pair a leader presents with every mutating write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseFence {
    pub lease_name: String,
    pub holder_id: String,
    pub lease_epoch: u64,
}

impl LeaseFence {
    /// Returns true if `record` is still the lease this fence was captured from.
    pub fn matches(&self, record: &LeaseRecord) -> bool {
        self.lease_name == record.lease_name
            && self.holder_id == record.holder_id
            && self.lease_epoch == record.lease_epoch
    }
}

impl std::fmt::Display for LeaseFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}#{}", self.holder_id, self.lease_name, self.lease_epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(holder: &str, epoch: u64, expires_at: DateTime<Utc>) -> LeaseRecord {
        LeaseRecord {
            lease_name: "courier-leader".to_string(),
            holder_id: holder.to_string(),
            lease_epoch: epoch,
            acquired_at: expires_at - Duration::seconds(15),
            renewed_at: expires_at - Duration::seconds(15),
            expires_at,
        }
    }

    #[test]
    fn fence_matches_only_same_holder_and_epoch() {
        let now = Utc::now();
        let lease = record("node-a", 3, now);
        let fence = lease.fence();

        assert!(fence.matches(&lease));
        assert!(!fence.matches(&record("node-a", 4, now)));
        assert!(!fence.matches(&record("node-b", 3, now)));
        assert_eq!(fence.to_string(), "node-a@courier-leader#3");
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let lease = record("node-a", 1, now);
        assert!(lease.is_expired(now));
        assert!(!lease.is_expired(now - Duration::milliseconds(1)));
    }
}

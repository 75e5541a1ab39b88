//! Why a leadership term ended.

use std::fmt;

/// Signal that this process must stop acting as leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("lease lost: {reason}")]
pub struct LeaseLost {
    pub reason: LeadershipEnd,
}

impl LeaseLost {
    pub fn new(reason: LeadershipEnd) -> Self {
        Self { reason }
    }
}

impl From<LeadershipEnd> for LeaseLost {
    fn from(reason: LeadershipEnd) -> Self {
        Self::new(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeadershipEnd {
    /// The process is shutting down.
    Cancelled,
    /// The lease row moved to another holder or epoch.
    RenewalRejected,
    /// Renewal could not reach the store.
    RenewalFailed,
    /// The incremental schedule refresh failed.
    RefreshFailed,
    /// A fenced write was rejected.
    Fenced,
    /// A store call on the execution path failed.
    StoreUnavailable,
    /// The schedule could not be rebuilt after acquisition.
    RebuildFailed,
}

impl LeadershipEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadershipEnd::Cancelled => "cancelled",
            LeadershipEnd::RenewalRejected => "renewal_rejected",
            LeadershipEnd::RenewalFailed => "renewal_failed",
            LeadershipEnd::RefreshFailed => "refresh_failed",
            LeadershipEnd::Fenced => "fenced",
            LeadershipEnd::StoreUnavailable => "store_unavailable",
            LeadershipEnd::RebuildFailed => "rebuild_failed",
        }
    }
}

impl fmt::Display for LeadershipEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_lost_names_its_reason() {
        let lost = LeaseLost::from(LeadershipEnd::Fenced);
        assert_eq!(lost.to_string(), "lease lost: fenced");
    }
}

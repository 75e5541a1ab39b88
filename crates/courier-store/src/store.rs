//! The persistence contract of the engine.
//!
//! The store is the single source of truth shared by every process of a
//! deployment. Writes that mutate intent, attempt or webhook state carry a
//! [`LeaseFence`] and are rejected when the lease row has moved on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    Attempt, ExhaustedReason, GatewayOutcome, IntentRecord, IntentStatus, LeaseConfig, LeaseFence,
    LeaseRecord, NewIntent, Result, TargetContract, WebhookStatus,
};
use serde::{Deserialize, Serialize};

/// Result of an idempotent insert.
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub intent: IntentRecord,
    /// True when an identical submission was already stored.
    pub existed: bool,
}

/// Result of a guarded read for execution.
#[derive(Debug, Clone)]
pub struct ExecutionCandidate {
    pub intent: IntentRecord,
    /// Attempts recorded so far; the next attempt is number `attempt_count + 1`.
    pub attempt_count: u32,
}

impl ExecutionCandidate {
    pub fn next_attempt_number(&self) -> u32 {
        self.attempt_count + 1
    }
}

/// Result of a fenced write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied.
    Applied,
    /// The intent (or its webhook) was no longer pending; nothing changed.
    NotPending,
    /// The fence no longer matches the lease row; nothing changed.
    Fenced,
}

impl WriteOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

/// Everything `record_attempt` writes in one transaction.
#[derive(Debug, Clone)]
pub struct AttemptWrite {
    pub intent_id: String,
    pub attempt: Attempt,
    pub status: IntentStatus,
    pub final_outcome: Option<GatewayOutcome>,
    pub exhausted_reason: Option<ExhaustedReason>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

/// High-water mark of the schedule, ordered by `(modified_at, intent_id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScheduleCursor {
    pub modified_at: DateTime<Utc>,
    pub intent_id: String,
}

impl ScheduleCursor {
    /// Cursor that precedes every row.
    pub fn origin() -> Self {
        Self {
            modified_at: DateTime::<Utc>::UNIX_EPOCH,
            intent_id: String::new(),
        }
    }

    /// Advance past `entry` if it sorts later.
    pub fn advance(&mut self, entry: &ScheduleEntry) {
        let candidate = ScheduleCursor {
            modified_at: entry.modified_at,
            intent_id: entry.intent_id.clone(),
        };
        if candidate > *self {
            *self = candidate;
        }
    }
}

/// One row of schedule state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub intent_id: String,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub status: IntentStatus,
    pub modified_at: DateTime<Utc>,
}

impl ScheduleEntry {
    /// The due time if this row belongs in a schedule.
    pub fn due(&self) -> Option<DateTime<Utc>> {
        match self.status {
            IntentStatus::Pending => self.next_attempt_at,
            _ => None,
        }
    }
}

/// Full schedule read.
#[derive(Debug, Clone)]
pub struct ScheduleSnapshot {
    /// Pending intents with a due time.
    pub entries: Vec<ScheduleEntry>,
    pub cursor: ScheduleCursor,
}

/// Durable persistence of intents, attempts and the leader lease.
#[async_trait]
pub trait Store: Send + Sync {
    /// The store's clock, truncated to millisecond precision. All scheduling
    /// decisions compare against this rather than the local process clock.
    async fn now(&self) -> Result<DateTime<Utc>>;

    /// Unique insert on `intent_id`, idempotent for identical submissions.
    ///
    /// Returns `CourierError::IdempotencyConflict` when the id is taken by a
    /// different target or payload.
    async fn insert_intent(
        &self,
        intent: &NewIntent,
        contract: &TargetContract,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome>;

    /// Full read including the attempt history.
    async fn load_intent(&self, intent_id: &str) -> Result<Option<IntentRecord>>;

    /// Row read without attempt history.
    async fn load_intent_row(&self, intent_id: &str) -> Result<Option<IntentRecord>>;

    /// Succeeds only for a pending intent whose next attempt is due at `now`.
    async fn load_intent_for_execution(
        &self,
        intent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExecutionCandidate>>;

    /// Append an attempt and move the intent to its next state, atomically.
    async fn record_attempt(
        &self,
        fence: &LeaseFence,
        write: &AttemptWrite,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome>;

    /// Exhaust a pending intent without an attempt.
    async fn mark_exhausted(
        &self,
        fence: &LeaseFence,
        intent_id: &str,
        reason: ExhaustedReason,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome>;

    /// Move the webhook sub-state from `pending` to `delivered` or `failed`.
    async fn record_webhook_attempt(
        &self,
        fence: &LeaseFence,
        intent_id: &str,
        status: WebhookStatus,
        attempted_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<WriteOutcome>;

    /// Terminal intents whose webhook is still owed.
    async fn load_pending_webhooks(&self) -> Result<Vec<String>>;

    /// All pending intents with a due time, plus the current high-water mark.
    async fn load_schedule_snapshot(&self) -> Result<ScheduleSnapshot>;

    /// Rows modified after `cursor`, in cursor order.
    async fn load_schedule_changes(&self, cursor: &ScheduleCursor) -> Result<Vec<ScheduleEntry>>;

    /// Claim the lease if it is expired or absent. `Ok(None)` means another
    /// holder has it.
    async fn acquire_lease(&self, config: &LeaseConfig) -> Result<Option<LeaseRecord>>;

    /// Extend the lease if `holder_id` and `lease_epoch` still match.
    async fn renew_lease(&self, config: &LeaseConfig, lease_epoch: u64)
        -> Result<Option<LeaseRecord>>;

    /// Expire the lease now if the fence still matches.
    async fn release_lease(&self, fence: &LeaseFence) -> Result<bool>;

    async fn read_lease(&self, lease_name: &str) -> Result<Option<LeaseRecord>>;
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn entry(id: &str, modified_at: DateTime<Utc>) -> ScheduleEntry {
        ScheduleEntry {
            intent_id: id.to_string(),
            next_attempt_at: Some(modified_at),
            status: IntentStatus::Pending,
            modified_at,
        }
    }

    #[test]
    fn cursor_orders_by_time_then_id() {
        let t = Utc::now();
        let mut cursor = ScheduleCursor::origin();

        cursor.advance(&entry("b", t));
        assert_eq!(cursor.intent_id, "b");

        cursor.advance(&entry("a", t));
        assert_eq!(cursor.intent_id, "b");

        cursor.advance(&entry("c", t));
        assert_eq!(cursor.intent_id, "c");

        cursor.advance(&entry("a", t + Duration::milliseconds(1)));
        assert_eq!(cursor.intent_id, "a");
        assert_eq!(cursor.modified_at, t + Duration::milliseconds(1));
    }

    #[test]
    fn terminal_entries_have_no_due_time() {
        let t = Utc::now();
        let mut e = entry("a", t);
        assert_eq!(e.due(), Some(t));

        e.status = IntentStatus::Accepted;
        assert_eq!(e.due(), None);
    }
}

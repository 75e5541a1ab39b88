//! Wire representation of intents, shared by the node API and the SDK.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::intent::{Attempt, GatewayOutcome, IntentRecord, WebhookState};
use crate::types::{ExhaustedReason, IntentStatus, WebhookStatus};

/// Current state of an intent as returned by `GET /v1/intents/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSnapshot {
    pub intent_id: String,
    pub submission_target: String,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub final_outcome: Option<GatewayOutcome>,
    pub exhausted_reason: Option<ExhaustedReason>,
    pub webhook: WebhookView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookView {
    pub status: WebhookStatus,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptView {
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub gateway_outcome: Option<GatewayOutcome>,
    pub error: Option<String>,
}

/// Snapshot plus the ordered attempt list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentHistory {
    #[serde(flatten)]
    pub intent: IntentSnapshot,
    pub attempts: Vec<AttemptView>,
}

impl IntentSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl From<&IntentRecord> for IntentSnapshot {
    fn from(record: &IntentRecord) -> Self {
        Self {
            intent_id: record.intent_id.clone(),
            submission_target: record.submission_target.clone(),
            status: record.status,
            created_at: record.created_at,
            completed_at: record.completed_at,
            attempt_count: record.attempt_count,
            next_attempt_at: record.next_attempt_at,
            final_outcome: record.final_outcome.clone(),
            exhausted_reason: record.exhausted_reason,
            webhook: WebhookView::from(&record.webhook),
        }
    }
}

impl From<&WebhookState> for WebhookView {
    fn from(state: &WebhookState) -> Self {
        Self {
            status: state.status,
            last_attempt_at: state.last_attempt_at,
            delivered_at: state.delivered_at,
            last_error: state.last_error.clone(),
        }
    }
}

impl From<&Attempt> for AttemptView {
    fn from(attempt: &Attempt) -> Self {
        Self {
            number: attempt.number,
            started_at: attempt.started_at,
            finished_at: attempt.finished_at,
            gateway_outcome: attempt.gateway_outcome.clone(),
            error: attempt.error.clone(),
        }
    }
}

impl From<&IntentRecord> for IntentHistory {
    fn from(record: &IntentRecord) -> Self {
        Self {
            intent: IntentSnapshot::from(record),
            attempts: record.attempts.iter().map(AttemptView::from).collect(),
        }
    }
}

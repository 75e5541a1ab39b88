//! Intent and attempt records.
//!
//! An Intent is the durable, idempotent record of a client's request to send
//! one message through a named submission target. Attempts are appended to it,
//! numbered from 1, and never rewritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::contract::TargetContract;
use crate::error::{CourierError, Result};
use crate::types::{ExhaustedReason, IntentStatus, WebhookStatus};

/// Gateway status string for an accepted message.
pub const OUTCOME_ACCEPTED: &str = "accepted";

/// Gateway status string for a rejected message.
pub const OUTCOME_REJECTED: &str = "rejected";

/// A client submission before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIntent {
    /// Caller-supplied idempotency key.
    pub intent_id: String,

    /// Name resolved against the target registry.
    pub submission_target: String,

    /// Opaque message payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// What a gateway reported for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOutcome {
    pub status: String,
    #[serde(default)]
    pub reason: String,
}

impl GatewayOutcome {
    pub fn accepted() -> Self {
        Self {
            status: OUTCOME_ACCEPTED.to_string(),
            reason: String::new(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: OUTCOME_REJECTED.to_string(),
            reason: reason.into(),
        }
    }
}

/// One execution try against the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Present when the gateway call returned normally.
    pub gateway_outcome: Option<GatewayOutcome>,
    /// Present when the call failed or its outcome was malformed.
    pub error: Option<String>,
}

/// Webhook delivery sub-state of an intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WebhookState {
    pub status: WebhookStatus,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// A persisted intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRecord {
    pub intent_id: String,
    pub submission_target: String,
    pub payload: serde_json::Value,
    pub payload_hash: String,

    /// Contract copied at creation time.
    pub contract: TargetContract,

    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Gateway outcome that ended the intent (accepted/rejected only).
    pub final_outcome: Option<GatewayOutcome>,

    /// Policy reason that ended the intent (exhausted only).
    pub exhausted_reason: Option<ExhaustedReason>,

    pub attempt_count: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_modified_at: DateTime<Utc>,
    pub webhook: WebhookState,

    /// Attempt history; empty unless loaded explicitly.
    #[serde(default)]
    pub attempts: Vec<Attempt>,
}

impl NewIntent {
    pub fn new(
        intent_id: impl Into<String>,
        submission_target: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            intent_id: intent_id.into(),
            submission_target: submission_target.into(),
            payload,
        }
    }

    /// Validate required fields.
    pub fn validate(&self) -> Result<()> {
        if self.intent_id.trim().is_empty() {
            return Err(CourierError::InvalidIntent {
                intent_id: None,
                message: "intentId is required".to_string(),
            });
        }

        if self.submission_target.trim().is_empty() {
            return Err(CourierError::InvalidIntent {
                intent_id: Some(self.intent_id.clone()),
                message: "submissionTarget is required".to_string(),
            });
        }

        Ok(())
    }

    /// Hash of the payload used for idempotency comparison.
    pub fn payload_hash(&self) -> String {
        payload_hash(&self.payload)
    }
}

/// SHA-256 over the canonical JSON encoding of a payload, hex-encoded.
///
/// Object keys serialize in sorted order, so two payloads that differ only in
/// key order hash identically.
pub fn payload_hash(payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical(payload).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn canonical(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonical(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonical).collect())
        }
        other => other.clone(),
    }
}

impl IntentRecord {
    /// A freshly created intent, due immediately.
    pub fn pending(
        new: &NewIntent,
        contract: TargetContract,
        payload_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        let webhook_status = if contract.webhook.is_some() {
            WebhookStatus::Pending
        } else {
            WebhookStatus::None
        };

        Self {
            intent_id: new.intent_id.clone(),
            submission_target: new.submission_target.clone(),
            payload: new.payload.clone(),
            payload_hash,
            contract,
            status: IntentStatus::Pending,
            created_at: now,
            completed_at: None,
            final_outcome: None,
            exhausted_reason: None,
            attempt_count: 0,
            next_attempt_at: Some(now),
            last_modified_at: now,
            webhook: WebhookState {
                status: webhook_status,
                ..WebhookState::default()
            },
            attempts: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Terminal intents carry exactly one of a final outcome or an exhausted reason.
    pub fn outcome_is_consistent(&self) -> bool {
        match self.status {
            IntentStatus::Pending => {
                self.final_outcome.is_none() && self.exhausted_reason.is_none()
            }
            IntentStatus::Accepted | IntentStatus::Rejected => {
                self.final_outcome.is_some() && self.exhausted_reason.is_none()
            }
            IntentStatus::Exhausted => {
                self.final_outcome.is_none() && self.exhausted_reason.is_some()
            }
        }
    }

    /// Returns true if `new` is the same submission as this record.
    pub fn matches_submission(&self, new: &NewIntent, payload_hash: &str) -> bool {
        self.submission_target == new.submission_target && self.payload_hash == payload_hash
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;
    use crate::contract::WebhookConfig;
    use crate::types::Policy;

    fn one_shot() -> TargetContract {
        TargetContract {
            gateway_type: "twilio".to_string(),
            gateway_url: "http://gateway.local".to_string(),
            policy: Policy::OneShot,
            max_acceptance_seconds: None,
            max_attempts: None,
            terminal_outcomes: BTreeSet::new(),
            known_outcomes: BTreeSet::new(),
            webhook: None,
        }
    }

    #[test]
    fn test_validation_requires_ids() {
        assert!(NewIntent::new("", "sms", json!({})).validate().is_err());
        assert!(NewIntent::new("i-1", " ", json!({})).validate().is_err());
        assert!(NewIntent::new("i-1", "sms", json!({})).validate().is_ok());
    }

    #[test]
    fn test_payload_hash_ignores_key_order() {
        let a = json!({"to": "+1", "message": "hello"});
        let b = json!({"message": "hello", "to": "+1"});
        assert_eq!(payload_hash(&a), payload_hash(&b));

        let c = json!({"message": "changed", "to": "+1"});
        assert_ne!(payload_hash(&a), payload_hash(&c));
        assert_eq!(payload_hash(&a).len(), 64);
    }

    #[test]
    fn test_pending_record_sets_webhook_state_from_contract() {
        let new = NewIntent::new("i-1", "sms", json!({"to": "+1"}));
        let now = Utc::now();

        let record = IntentRecord::pending(&new, one_shot(), new.payload_hash(), now);
        assert_eq!(record.status, IntentStatus::Pending);
        assert_eq!(record.next_attempt_at, Some(now));
        assert_eq!(record.webhook.status, WebhookStatus::None);
        assert!(record.outcome_is_consistent());

        let mut contract = one_shot();
        contract.webhook = Some(WebhookConfig {
            url: "http://hooks.local".to_string(),
            headers: Default::default(),
            headers_env: Default::default(),
            secret_env: None,
        });
        let record = IntentRecord::pending(&new, contract, new.payload_hash(), now);
        assert_eq!(record.webhook.status, WebhookStatus::Pending);
    }

    #[test]
    fn test_outcome_consistency() {
        let new = NewIntent::new("i-1", "sms", json!({}));
        let mut record = IntentRecord::pending(&new, one_shot(), new.payload_hash(), Utc::now());

        record.status = IntentStatus::Exhausted;
        assert!(!record.outcome_is_consistent());

        record.exhausted_reason = Some(ExhaustedReason::OneShot);
        assert!(record.outcome_is_consistent());

        record.final_outcome = Some(GatewayOutcome::accepted());
        assert!(!record.outcome_is_consistent());
    }

    #[test]
    fn test_matches_submission() {
        let new = NewIntent::new("i-1", "sms", json!({"message": "hello"}));
        let record = IntentRecord::pending(&new, one_shot(), new.payload_hash(), Utc::now());
        assert!(record.matches_submission(&new, &new.payload_hash()));

        let changed = NewIntent::new("i-1", "sms", json!({"message": "changed"}));
        assert!(!record.matches_submission(&changed, &changed.payload_hash()));

        let retargeted = NewIntent::new("i-1", "push", json!({"message": "hello"}));
        assert!(!record.matches_submission(&retargeted, &retargeted.payload_hash()));
    }
}

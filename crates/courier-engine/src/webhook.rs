//! Terminal-event webhooks.
//!
//! The engine builds the event and the delivery directives; a
//! [`WebhookSender`] owns the transport, environment lookups and signing.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    CourierError, ExhaustedReason, IntentRecord, IntentStatus, Result, WebhookStatus,
};
use serde::{Deserialize, Serialize};

/// JSON body announcing a terminal intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub event_id: String,
    pub event_type: String,
    pub intent_id: String,
    pub submission_target: String,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exhausted_reason: Option<ExhaustedReason>,
}

impl WebhookEvent {
    /// Event for a terminal intent. Fails for a pending one.
    pub fn for_intent(intent: &IntentRecord) -> Result<Self> {
        if !intent.is_terminal() {
            return Err(CourierError::Webhook {
                message: format!("intent {} is not terminal", intent.intent_id),
            });
        }

        let rejected_reason = match intent.status {
            IntentStatus::Rejected => intent.final_outcome.as_ref().map(|o| o.reason.clone()),
            _ => None,
        };
        let exhausted_reason = match intent.status {
            IntentStatus::Exhausted => intent.exhausted_reason,
            _ => None,
        };

        Ok(Self {
            event_id: intent.intent_id.clone(),
            event_type: format!("intent.{}", intent.status),
            intent_id: intent.intent_id.clone(),
            submission_target: intent.submission_target.clone(),
            status: intent.status,
            created_at: intent.created_at,
            completed_at: intent.completed_at,
            attempt_count: intent.attempt_count,
            rejected_reason,
            exhausted_reason,
        })
    }
}

/// A ready-to-send webhook: where, with which headers, and the event body.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookDelivery {
    pub intent_id: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// Header name -> environment variable resolved by the sender.
    pub headers_env: BTreeMap<String, String>,
    /// Environment variable holding the signing secret.
    pub secret_env: Option<String>,
    pub body: serde_json::Value,
}

impl WebhookDelivery {
    /// Delivery owed for `intent`, if any.
    ///
    /// `None` unless the frozen contract configures a webhook, the intent is
    /// terminal and its webhook is still pending.
    pub fn for_intent(intent: &IntentRecord) -> Result<Option<Self>> {
        let Some(config) = &intent.contract.webhook else {
            return Ok(None);
        };
        if !intent.is_terminal() || intent.webhook.status != WebhookStatus::Pending {
            return Ok(None);
        }

        let event = WebhookEvent::for_intent(intent)?;
        Ok(Some(Self {
            intent_id: intent.intent_id.clone(),
            url: config.url.clone(),
            headers: config.headers.clone(),
            headers_env: config.headers_env.clone(),
            secret_env: config.secret_env.clone(),
            body: serde_json::to_value(&event)?,
        }))
    }
}

/// Transport for webhook deliveries.
///
/// Implementations resolve `headers_env` and `secret_env` from the process
/// environment, sign the body when a secret is configured, and return an
/// error for transport failures and non-2xx responses.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, delivery: &WebhookDelivery) -> Result<()>;
}

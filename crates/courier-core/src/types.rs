//! Common types used across the courier engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CourierError;

/// Status of an Intent.
///
/// `Pending` is the only non-terminal state; there are no transitions out of
/// a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Waiting for its next attempt.
    Pending,
    /// The gateway accepted the message.
    Accepted,
    /// The gateway reported a terminal rejection.
    Rejected,
    /// The retry policy ran out before an acceptance or terminal rejection.
    Exhausted,
}

impl IntentStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IntentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Accepted => "accepted",
            IntentStatus::Rejected => "rejected",
            IntentStatus::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IntentStatus::Pending),
            "accepted" => Ok(IntentStatus::Accepted),
            "rejected" => Ok(IntentStatus::Rejected),
            "exhausted" => Ok(IntentStatus::Exhausted),
            other => Err(CourierError::Serialization(format!(
                "unknown intent status '{}'",
                other
            ))),
        }
    }
}

/// Delivery sub-state of the completion webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    /// The contract has no webhook.
    #[default]
    None,
    /// A webhook is owed once the intent reaches a terminal state.
    Pending,
    Delivered,
    Failed,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::None => "none",
            WebhookStatus::Pending => "pending",
            WebhookStatus::Delivered => "delivered",
            WebhookStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookStatus {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(WebhookStatus::None),
            "pending" => Ok(WebhookStatus::Pending),
            "delivered" => Ok(WebhookStatus::Delivered),
            "failed" => Ok(WebhookStatus::Failed),
            other => Err(CourierError::Serialization(format!(
                "unknown webhook status '{}'",
                other
            ))),
        }
    }
}

/// Why an intent was exhausted by its policy.
///
/// Kept apart from gateway outcome reasons, which live in a different namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedReason {
    DeadlineExceeded,
    MaxAttempts,
    OneShot,
    UnknownPolicy,
}

impl ExhaustedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExhaustedReason::DeadlineExceeded => "deadline_exceeded",
            ExhaustedReason::MaxAttempts => "max_attempts",
            ExhaustedReason::OneShot => "one_shot",
            ExhaustedReason::UnknownPolicy => "unknown_policy",
        }
    }
}

impl fmt::Display for ExhaustedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExhaustedReason {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deadline_exceeded" => Ok(ExhaustedReason::DeadlineExceeded),
            "max_attempts" => Ok(ExhaustedReason::MaxAttempts),
            "one_shot" => Ok(ExhaustedReason::OneShot),
            "unknown_policy" => Ok(ExhaustedReason::UnknownPolicy),
            other => Err(CourierError::Serialization(format!(
                "unknown exhausted reason '{}'",
                other
            ))),
        }
    }
}

/// Retry policy of a target contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Retry until `max_acceptance_seconds` after creation.
    Deadline,
    /// Retry up to `max_attempts` attempts.
    MaxAttempts,
    /// A single attempt, no retries.
    OneShot,
    /// A policy value this build does not understand.
    #[serde(other)]
    Unknown,
}

impl Policy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Deadline => "deadline",
            Policy::MaxAttempts => "max_attempts",
            Policy::OneShot => "one_shot",
            Policy::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_status_terminal() {
        assert!(IntentStatus::Accepted.is_terminal());
        assert!(IntentStatus::Rejected.is_terminal());
        assert!(IntentStatus::Exhausted.is_terminal());
        assert!(!IntentStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_string_forms_parse_back() {
        for status in [
            IntentStatus::Pending,
            IntentStatus::Accepted,
            IntentStatus::Rejected,
            IntentStatus::Exhausted,
        ] {
            assert_eq!(status.as_str().parse::<IntentStatus>().unwrap(), status);
        }
        assert!("done".parse::<IntentStatus>().is_err());
    }

    #[test]
    fn test_unknown_policy_deserializes() {
        let policy: Policy = serde_json::from_str("\"exponential\"").unwrap();
        assert_eq!(policy, Policy::Unknown);

        let policy: Policy = serde_json::from_str("\"max_attempts\"").unwrap();
        assert_eq!(policy, Policy::MaxAttempts);
    }

    #[test]
    fn test_exhausted_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&ExhaustedReason::DeadlineExceeded).unwrap(),
            "\"deadline_exceeded\""
        );
        assert_eq!(ExhaustedReason::OneShot.to_string(), "one_shot");
    }
}

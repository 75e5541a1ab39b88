//! Target contracts: gateway routing plus retry policy for a submission target.
//!
//! A contract is resolved from the registry when an intent is submitted and a
//! full value copy is frozen into the intent. Later registry edits never reach
//! intents that already exist.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CourierError, Result};
use crate::types::Policy;

/// Largest acceptance window a contract may declare (ten years).
pub const MAX_ACCEPTANCE_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Routing and retry contract for a submission target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetContract {
    /// Gateway family (e.g. "twilio", "fcm").
    pub gateway_type: String,

    /// Gateway endpoint.
    pub gateway_url: String,

    /// Retry policy.
    pub policy: Policy,

    /// Acceptance deadline for the `deadline` policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_acceptance_seconds: Option<u64>,

    /// Attempt limit for the `max_attempts` policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Rejection reasons that end retries immediately.
    #[serde(default)]
    pub terminal_outcomes: BTreeSet<String>,

    /// Rejection reasons the gateway is known to emit. Informational only.
    #[serde(default)]
    pub known_outcomes: BTreeSet<String>,

    /// Completion webhook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
}

/// Where and how to announce terminal intents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    /// Static headers sent as-is.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Header name -> environment variable holding its value.
    #[serde(default)]
    pub headers_env: BTreeMap<String, String>,

    /// Environment variable holding the signing secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_env: Option<String>,
}

impl TargetContract {
    /// Validate the contract as the registry does at load time.
    pub fn validate(&self, name: &str) -> Result<()> {
        let invalid = |message: String| CourierError::registry(format!("target '{}': {}", name, message));

        if self.gateway_type.trim().is_empty() {
            return Err(invalid("gateway_type cannot be empty".to_string()));
        }
        if self.gateway_url.trim().is_empty() {
            return Err(invalid("gateway_url cannot be empty".to_string()));
        }

        match self.policy {
            Policy::Deadline => {
                if self.max_attempts.is_some() {
                    return Err(invalid(
                        "max_attempts is not allowed with the deadline policy".to_string(),
                    ));
                }
                match self.max_acceptance_seconds {
                    Some(seconds) if seconds > MAX_ACCEPTANCE_SECONDS => {
                        return Err(invalid(format!(
                            "max_acceptance_seconds cannot exceed {}",
                            MAX_ACCEPTANCE_SECONDS
                        )))
                    }
                    Some(seconds) if seconds > 0 => {}
                    _ => {
                        return Err(invalid(
                            "deadline policy requires max_acceptance_seconds > 0".to_string(),
                        ))
                    }
                }
            }
            Policy::MaxAttempts => {
                if self.max_acceptance_seconds.is_some() {
                    return Err(invalid(
                        "max_acceptance_seconds is not allowed with the max_attempts policy"
                            .to_string(),
                    ));
                }
                match self.max_attempts {
                    Some(attempts) if attempts > 0 => {}
                    _ => {
                        return Err(invalid(
                            "max_attempts policy requires max_attempts > 0".to_string(),
                        ))
                    }
                }
            }
            Policy::OneShot => {
                if self.max_attempts.is_some() || self.max_acceptance_seconds.is_some() {
                    return Err(invalid(
                        "one_shot policy takes neither max_attempts nor max_acceptance_seconds"
                            .to_string(),
                    ));
                }
            }
            Policy::Unknown => return Err(invalid("unknown policy".to_string())),
        }

        if self
            .terminal_outcomes
            .iter()
            .chain(self.known_outcomes.iter())
            .any(|reason| reason.trim().is_empty())
        {
            return Err(invalid("outcome reasons cannot be empty".to_string()));
        }

        if let Some(webhook) = &self.webhook {
            if webhook.url.trim().is_empty() {
                return Err(invalid("webhook url cannot be empty".to_string()));
            }
        }

        Ok(())
    }

    /// Acceptance deadline for an intent created at `created_at`, if the policy has one.
    ///
    /// A window too large to represent yields no deadline.
    pub fn acceptance_deadline(&self, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match (self.policy, self.max_acceptance_seconds) {
            (Policy::Deadline, Some(seconds)) => i64::try_from(seconds)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|window| created_at.checked_add_signed(window)),
            _ => None,
        }
    }

    /// Returns true if `reason` ends retries immediately.
    pub fn is_terminal_outcome(&self, reason: &str) -> bool {
        self.terminal_outcomes.contains(reason)
    }

    /// Returns true if `reason` appears in either outcome list.
    pub fn is_known_outcome(&self, reason: &str) -> bool {
        self.terminal_outcomes.contains(reason) || self.known_outcomes.contains(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(policy: Policy) -> TargetContract {
        TargetContract {
            gateway_type: "twilio".to_string(),
            gateway_url: "http://gateway.local/send".to_string(),
            policy,
            max_acceptance_seconds: None,
            max_attempts: None,
            terminal_outcomes: BTreeSet::new(),
            known_outcomes: BTreeSet::new(),
            webhook: None,
        }
    }

    #[test]
    fn deadline_requires_seconds_only() {
        let mut c = contract(Policy::Deadline);
        assert!(c.validate("t").is_err());

        c.max_acceptance_seconds = Some(60);
        assert!(c.validate("t").is_ok());

        c.max_attempts = Some(3);
        assert!(c.validate("t").is_err());
    }

    #[test]
    fn max_attempts_requires_positive_limit() {
        let mut c = contract(Policy::MaxAttempts);
        c.max_attempts = Some(0);
        assert!(c.validate("t").is_err());

        c.max_attempts = Some(3);
        assert!(c.validate("t").is_ok());

        c.max_acceptance_seconds = Some(10);
        assert!(c.validate("t").is_err());
    }

    #[test]
    fn one_shot_rejects_bounds_and_unknown_is_invalid() {
        let mut c = contract(Policy::OneShot);
        assert!(c.validate("t").is_ok());
        c.max_attempts = Some(1);
        assert!(c.validate("t").is_err());

        assert!(contract(Policy::Unknown).validate("t").is_err());
    }

    #[test]
    fn deadline_is_relative_to_creation() {
        let mut c = contract(Policy::Deadline);
        c.max_acceptance_seconds = Some(30);
        let created = Utc::now();
        assert_eq!(
            c.acceptance_deadline(created),
            Some(created + Duration::seconds(30))
        );
        assert_eq!(contract(Policy::OneShot).acceptance_deadline(created), None);
    }

    #[test]
    fn oversized_deadlines_are_rejected_and_never_overflow() {
        let mut c = contract(Policy::Deadline);
        c.max_acceptance_seconds = Some(MAX_ACCEPTANCE_SECONDS);
        assert!(c.validate("t").is_ok());
        c.max_acceptance_seconds = Some(MAX_ACCEPTANCE_SECONDS + 1);
        assert!(c.validate("t").is_err());

        // Contracts frozen before the bound existed still evaluate.
        let created = Utc::now();
        for seconds in [9_300_000_000_000_000, u64::MAX] {
            c.max_acceptance_seconds = Some(seconds);
            assert_eq!(c.acceptance_deadline(created), None);
        }
        c.max_acceptance_seconds = Some(MAX_ACCEPTANCE_SECONDS);
        assert_eq!(c.acceptance_deadline(DateTime::<Utc>::MAX_UTC), None);
    }

    #[test]
    fn empty_webhook_url_is_invalid() {
        let mut c = contract(Policy::OneShot);
        c.webhook = Some(WebhookConfig {
            url: " ".to_string(),
            headers: BTreeMap::new(),
            headers_env: BTreeMap::new(),
            secret_env: None,
        });
        assert!(c.validate("t").is_err());
    }
}

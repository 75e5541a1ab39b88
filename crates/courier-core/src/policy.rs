//! Retry policy engine.
//!
//! Pure decision logic: given a frozen contract, the intent's creation time and
//! a finished attempt, decide whether the intent is accepted, rejected,
//! exhausted, or due for another attempt.

use chrono::{DateTime, Duration, Utc};

use crate::contract::TargetContract;
use crate::intent::{Attempt, GatewayOutcome, OUTCOME_ACCEPTED, OUTCOME_REJECTED};
use crate::types::{ExhaustedReason, IntentStatus, Policy};

/// Tunables for the policy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Constant delay between a finished attempt and the next one.
    pub retry_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::seconds(5),
        }
    }
}

/// Outcome of evaluating one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Intent -> accepted, with the gateway outcome as final outcome.
    Accept(GatewayOutcome),
    /// Intent -> rejected by a terminal outcome.
    Reject(GatewayOutcome),
    /// Intent -> exhausted by policy.
    Exhaust(ExhaustedReason),
    /// Intent stays pending; next attempt due at `at`.
    Retry { at: DateTime<Utc> },
}

impl Decision {
    /// Intent status after applying this decision.
    pub fn status(&self) -> IntentStatus {
        match self {
            Decision::Accept(_) => IntentStatus::Accepted,
            Decision::Reject(_) => IntentStatus::Rejected,
            Decision::Exhaust(_) => IntentStatus::Exhausted,
            Decision::Retry { .. } => IntentStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Decision::Retry { .. })
    }

    pub fn final_outcome(&self) -> Option<&GatewayOutcome> {
        match self {
            Decision::Accept(outcome) | Decision::Reject(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn exhausted_reason(&self) -> Option<ExhaustedReason> {
        match self {
            Decision::Exhaust(reason) => Some(*reason),
            _ => None,
        }
    }

    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Decision::Retry { at } => Some(*at),
            _ => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Accept(_) => "accepted",
            Decision::Reject(_) => "rejected",
            Decision::Exhaust(_) => "exhausted",
            Decision::Retry { .. } => "retry",
        }
    }
}

/// Evaluate a finished attempt.
///
/// Malformed gateway outcomes are annotated on `attempt.error` and treated
/// like a failed call.
pub fn evaluate_attempt(
    contract: &TargetContract,
    created_at: DateTime<Utc>,
    attempt: &mut Attempt,
    settings: &RetrySettings,
) -> Decision {
    let outcome = match (&attempt.gateway_outcome, &attempt.error) {
        (Some(outcome), None) => outcome.clone(),
        _ => return apply_policy(contract, created_at, attempt, settings),
    };

    match outcome.status.as_str() {
        OUTCOME_ACCEPTED => {
            // An acceptance that lands after the deadline does not count.
            if let Some(deadline) = contract.acceptance_deadline(created_at) {
                if attempt.finished_at >= deadline {
                    return Decision::Exhaust(ExhaustedReason::DeadlineExceeded);
                }
            }
            Decision::Accept(outcome)
        }
        OUTCOME_REJECTED if outcome.reason.trim().is_empty() => {
            attempt.error = Some("malformed gateway outcome: rejected without reason".to_string());
            apply_policy(contract, created_at, attempt, settings)
        }
        OUTCOME_REJECTED if contract.is_terminal_outcome(&outcome.reason) => {
            Decision::Reject(outcome)
        }
        OUTCOME_REJECTED => apply_policy(contract, created_at, attempt, settings),
        other => {
            attempt.error = Some(format!("malformed gateway outcome: status '{}'", other));
            apply_policy(contract, created_at, attempt, settings)
        }
    }
}

/// Policy-specific termination for a non-terminal attempt.
pub fn apply_policy(
    contract: &TargetContract,
    created_at: DateTime<Utc>,
    attempt: &Attempt,
    settings: &RetrySettings,
) -> Decision {
    let next_due = attempt.finished_at + settings.retry_delay;

    match contract.policy {
        Policy::OneShot => Decision::Exhaust(ExhaustedReason::OneShot),
        Policy::MaxAttempts => match contract.max_attempts {
            Some(limit) if attempt.number < limit => Decision::Retry { at: next_due },
            _ => Decision::Exhaust(ExhaustedReason::MaxAttempts),
        },
        Policy::Deadline => match contract.acceptance_deadline(created_at) {
            Some(deadline) if attempt.finished_at < deadline && next_due < deadline => {
                Decision::Retry { at: next_due }
            }
            _ => Decision::Exhaust(ExhaustedReason::DeadlineExceeded),
        },
        Policy::Unknown => Decision::Exhaust(ExhaustedReason::UnknownPolicy),
    }
}

/// Returns true if a deadline-policy intent can no longer be accepted at `now`.
pub fn deadline_passed(
    contract: &TargetContract,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    contract
        .acceptance_deadline(created_at)
        .map_or(false, |deadline| now >= deadline)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn contract(policy: Policy) -> TargetContract {
        TargetContract {
            gateway_type: "twilio".to_string(),
            gateway_url: "http://gateway.local".to_string(),
            policy,
            max_acceptance_seconds: match policy {
                Policy::Deadline => Some(60),
                _ => None,
            },
            max_attempts: match policy {
                Policy::MaxAttempts => Some(3),
                _ => None,
            },
            terminal_outcomes: BTreeSet::from(["invalid_number".to_string()]),
            known_outcomes: BTreeSet::from(["throttled".to_string()]),
            webhook: None,
        }
    }

    fn attempt(
        number: u32,
        finished_at: DateTime<Utc>,
        outcome: Option<GatewayOutcome>,
        error: Option<&str>,
    ) -> Attempt {
        Attempt {
            number,
            started_at: finished_at,
            finished_at,
            gateway_outcome: outcome,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn accepted_outcome_is_final() {
        let created = Utc::now();
        let mut a = attempt(1, created, Some(GatewayOutcome::accepted()), None);
        let decision = evaluate_attempt(
            &contract(Policy::MaxAttempts),
            created,
            &mut a,
            &RetrySettings::default(),
        );
        assert_eq!(decision, Decision::Accept(GatewayOutcome::accepted()));
        assert_eq!(decision.status(), IntentStatus::Accepted);
        assert!(a.error.is_none());
    }

    #[test]
    fn late_acceptance_is_exhausted_under_deadline() {
        let created = Utc::now();
        let finished = created + Duration::seconds(60);
        let mut a = attempt(1, finished, Some(GatewayOutcome::accepted()), None);
        let decision = evaluate_attempt(
            &contract(Policy::Deadline),
            created,
            &mut a,
            &RetrySettings::default(),
        );
        assert_eq!(decision, Decision::Exhaust(ExhaustedReason::DeadlineExceeded));
        assert!(decision.final_outcome().is_none());
    }

    #[test]
    fn terminal_rejection_ends_retries() {
        let created = Utc::now();
        let mut a = attempt(1, created, Some(GatewayOutcome::rejected("invalid_number")), None);
        let decision = evaluate_attempt(
            &contract(Policy::MaxAttempts),
            created,
            &mut a,
            &RetrySettings::default(),
        );
        assert_eq!(
            decision,
            Decision::Reject(GatewayOutcome::rejected("invalid_number"))
        );
    }

    #[test]
    fn unlisted_rejection_reason_is_retried() {
        let created = Utc::now();
        let settings = RetrySettings::default();
        for reason in ["throttled", "never_heard_of_it"] {
            let mut a = attempt(1, created, Some(GatewayOutcome::rejected(reason)), None);
            let decision =
                evaluate_attempt(&contract(Policy::MaxAttempts), created, &mut a, &settings);
            assert_eq!(
                decision,
                Decision::Retry {
                    at: created + settings.retry_delay
                }
            );
            assert!(a.error.is_none());
        }
    }

    #[test]
    fn rejection_without_reason_is_malformed() {
        let created = Utc::now();
        let mut a = attempt(1, created, Some(GatewayOutcome::rejected("")), None);
        let decision = evaluate_attempt(
            &contract(Policy::MaxAttempts),
            created,
            &mut a,
            &RetrySettings::default(),
        );
        assert!(matches!(decision, Decision::Retry { .. }));
        assert!(a.error.as_deref().unwrap().contains("malformed"));
    }

    #[test]
    fn unrecognized_status_is_malformed() {
        let created = Utc::now();
        let outcome = GatewayOutcome {
            status: "queued".to_string(),
            reason: String::new(),
        };
        let mut a = attempt(1, created, Some(outcome), None);
        let decision = evaluate_attempt(
            &contract(Policy::OneShot),
            created,
            &mut a,
            &RetrySettings::default(),
        );
        assert_eq!(decision, Decision::Exhaust(ExhaustedReason::OneShot));
        assert!(a.error.as_deref().unwrap().contains("queued"));
    }

    #[test]
    fn executor_error_goes_through_policy() {
        let created = Utc::now();
        let mut a = attempt(1, created, None, Some("connection refused"));
        let decision = evaluate_attempt(
            &contract(Policy::MaxAttempts),
            created,
            &mut a,
            &RetrySettings::default(),
        );
        assert!(matches!(decision, Decision::Retry { .. }));
        assert_eq!(a.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn max_attempts_exhausts_at_limit() {
        let created = Utc::now();
        let c = contract(Policy::MaxAttempts);
        let settings = RetrySettings::default();

        let second = attempt(2, created, Some(GatewayOutcome::rejected("throttled")), None);
        assert!(matches!(
            apply_policy(&c, created, &second, &settings),
            Decision::Retry { .. }
        ));

        let third = attempt(3, created, Some(GatewayOutcome::rejected("throttled")), None);
        assert_eq!(
            apply_policy(&c, created, &third, &settings),
            Decision::Exhaust(ExhaustedReason::MaxAttempts)
        );
    }

    #[test]
    fn one_shot_always_exhausts() {
        let created = Utc::now();
        let a = attempt(1, created, Some(GatewayOutcome::rejected("throttled")), None);
        assert_eq!(
            apply_policy(&contract(Policy::OneShot), created, &a, &RetrySettings::default()),
            Decision::Exhaust(ExhaustedReason::OneShot)
        );
    }

    #[test]
    fn deadline_refuses_retry_that_cannot_land_in_time() {
        let created = Utc::now();
        let c = contract(Policy::Deadline);
        let settings = RetrySettings::default();

        let early = attempt(1, created + Duration::seconds(10), None, Some("timeout"));
        assert_eq!(
            apply_policy(&c, created, &early, &settings),
            Decision::Retry {
                at: created + Duration::seconds(15)
            }
        );

        let close = attempt(2, created + Duration::seconds(55), None, Some("timeout"));
        assert_eq!(
            apply_policy(&c, created, &close, &settings),
            Decision::Exhaust(ExhaustedReason::DeadlineExceeded)
        );

        let late = attempt(3, created + Duration::seconds(61), None, Some("timeout"));
        assert_eq!(
            apply_policy(&c, created, &late, &settings),
            Decision::Exhaust(ExhaustedReason::DeadlineExceeded)
        );
    }

    #[test]
    fn unknown_policy_exhausts() {
        let created = Utc::now();
        let a = attempt(1, created, None, Some("boom"));
        assert_eq!(
            apply_policy(&contract(Policy::Unknown), created, &a, &RetrySettings::default()),
            Decision::Exhaust(ExhaustedReason::UnknownPolicy)
        );
    }

    #[test]
    fn deadline_precheck() {
        let created = Utc::now();
        let c = contract(Policy::Deadline);
        assert!(!deadline_passed(&c, created, created + Duration::seconds(59)));
        assert!(deadline_passed(&c, created, created + Duration::seconds(60)));
        assert!(!deadline_passed(
            &contract(Policy::MaxAttempts),
            created,
            created + Duration::days(1)
        ));
    }
}

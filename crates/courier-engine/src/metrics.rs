//! Metric names and recording helpers.
//!
//! Recorded through the `metrics` facade; without an installed recorder these
//! are no-ops.

use std::time::Duration;

pub const SUBMISSIONS_TOTAL: &str = "courier_submissions_total";
pub const ATTEMPTS_TOTAL: &str = "courier_attempts_total";
pub const UNKNOWN_REJECTIONS_TOTAL: &str = "courier_unknown_rejections_total";
pub const FENCED_WRITES_TOTAL: &str = "courier_fenced_writes_total";
pub const LEADERSHIP_TRANSITIONS_TOTAL: &str = "courier_leadership_transitions_total";
pub const WEBHOOK_DELIVERIES_TOTAL: &str = "courier_webhook_deliveries_total";
pub const GATEWAY_LATENCY_SECONDS: &str = "courier_gateway_latency_seconds";
pub const IS_LEADER: &str = "courier_is_leader";

/// `result` is one of `created`, `existing`, `conflict`.
pub fn submission(result: &'static str) {
    ::metrics::counter!(SUBMISSIONS_TOTAL, "result" => result).increment(1);
}

pub fn attempt(decision: &'static str, gateway_type: &str) {
    ::metrics::counter!(
        ATTEMPTS_TOTAL,
        "decision" => decision,
        "gateway_type" => gateway_type.to_string()
    )
    .increment(1);
}

pub fn unknown_rejection(gateway_type: &str) {
    ::metrics::counter!(UNKNOWN_REJECTIONS_TOTAL, "gateway_type" => gateway_type.to_string())
        .increment(1);
}

pub fn fenced_write(operation: &'static str) {
    ::metrics::counter!(FENCED_WRITES_TOTAL, "operation" => operation).increment(1);
}

pub fn gateway_latency(elapsed: Duration) {
    ::metrics::histogram!(GATEWAY_LATENCY_SECONDS).record(elapsed.as_secs_f64());
}

pub fn leadership(acquired: bool, reason: &'static str) {
    let transition = if acquired { "acquired" } else { "lost" };
    ::metrics::counter!(
        LEADERSHIP_TRANSITIONS_TOTAL,
        "transition" => transition,
        "reason" => reason
    )
    .increment(1);
    ::metrics::gauge!(IS_LEADER).set(if acquired { 1.0 } else { 0.0 });
}

/// `result` is one of `delivered`, `failed`.
pub fn webhook(result: &'static str) {
    ::metrics::counter!(WEBHOOK_DELIVERIES_TOTAL, "result" => result).increment(1);
}

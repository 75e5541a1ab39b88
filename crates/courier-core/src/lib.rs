//! # Courier Core
//!
//! Core primitives for the courier submission engine.
//!
//! This crate provides the fundamental building blocks:
//! - [`IntentRecord`] / [`Attempt`] - durable submission state
//! - [`TargetContract`] / [`TargetRegistry`] - routing and retry contracts
//! - [`policy`] - the retry policy engine
//! - [`LeaseFence`] - fencing tokens for the single-writer model
//! - [`CourierError`] - error types

pub mod clock;
pub mod contract;
pub mod error;
pub mod intent;
pub mod lease;
pub mod policy;
pub mod registry;
pub mod snapshot;
pub mod types;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use contract::{TargetContract, WebhookConfig};
pub use error::{CourierError, IdempotencyConflict, Result};
pub use intent::{payload_hash, Attempt, GatewayOutcome, IntentRecord, NewIntent, WebhookState};
pub use lease::{LeaseConfig, LeaseFence, LeaseRecord};
pub use policy::{Decision, RetrySettings};
pub use registry::TargetRegistry;
pub use snapshot::{AttemptView, IntentHistory, IntentSnapshot, WebhookView};
pub use types::*;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::contract::{TargetContract, WebhookConfig};
    pub use crate::error::{CourierError, Result};
    pub use crate::intent::{Attempt, GatewayOutcome, IntentRecord, NewIntent};
    pub use crate::lease::{LeaseConfig, LeaseFence, LeaseRecord};
    pub use crate::types::{ExhaustedReason, IntentStatus, Policy, WebhookStatus};
}

//! Error types for the courier engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::IntentStatus;

/// Main error type for courier operations.
#[derive(Error, Debug, Clone)]
pub enum CourierError {
    /// Submission failed validation (missing ids, malformed payload).
    #[error("Intent validation failed: {message}")]
    InvalidIntent {
        intent_id: Option<String>,
        message: String,
    },

    /// The submission target is not present in the registry.
    #[error("Unknown submission target: {target}")]
    UnknownSubmissionTarget { target: String },

    /// Same intent id submitted with a different target or payload.
    #[error("{0}")]
    IdempotencyConflict(Box<IdempotencyConflict>),

    /// Resource not found.
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    /// Target registry could not be loaded or failed validation.
    #[error("Target registry error: {message}")]
    Registry { message: String },

    /// Persistence layer error.
    #[error("Store error: {message}")]
    Store { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Downstream gateway call failed.
    #[error("Gateway error: {message}")]
    Gateway { message: String },

    /// Webhook delivery failed.
    #[error("Webhook error: {message}")]
    Webhook { message: String },

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Diagnostics for an idempotency conflict: the stored intent versus the incoming one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyConflict {
    pub intent_id: String,
    pub existing_target: String,
    pub incoming_target: String,
    pub existing_payload: serde_json::Value,
    pub incoming_payload: serde_json::Value,
    pub existing_payload_hash: String,
    pub incoming_payload_hash: String,
    pub existing_status: IntentStatus,
}

impl std::fmt::Display for IdempotencyConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Idempotency conflict for intent {}: existing target {} (payload {}, status {}), incoming target {} (payload {})",
            self.intent_id,
            self.existing_target,
            self.existing_payload_hash,
            self.existing_status,
            self.incoming_target,
            self.incoming_payload_hash,
        )
    }
}

impl CourierError {
    /// Shorthand for a store error.
    pub fn store(message: impl Into<String>) -> Self {
        CourierError::Store {
            message: message.into(),
        }
    }

    /// Shorthand for a registry error.
    pub fn registry(message: impl Into<String>) -> Self {
        CourierError::Registry {
            message: message.into(),
        }
    }

    /// Returns true if this error is caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CourierError::InvalidIntent { .. }
                | CourierError::UnknownSubmissionTarget { .. }
                | CourierError::IdempotencyConflict(_)
                | CourierError::NotFound { .. }
        )
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CourierError::Gateway { .. }
                | CourierError::Webhook { .. }
                | CourierError::Connection(_)
        )
    }

    /// Returns the intent id if available.
    pub fn intent_id(&self) -> Option<&str> {
        match self {
            CourierError::InvalidIntent { intent_id, .. } => intent_id.as_deref(),
            CourierError::IdempotencyConflict(conflict) => Some(&conflict.intent_id),
            _ => None,
        }
    }
}

/// Convenience Result type for courier operations.
pub type Result<T> = std::result::Result<T, CourierError>;

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        CourierError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for CourierError {
    fn from(err: toml::de::Error) -> Self {
        CourierError::registry(err.to_string())
    }
}

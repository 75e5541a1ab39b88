//! HTTP error mapping for the intent API.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use courier_core::CourierError;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope {
    request_id: String,
    error: ErrorBody,
}

#[derive(Clone, Debug)]
pub struct ErrorState {
    pub message: String,
    pub details: Option<Value>,
}

impl ErrorState {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(ErrorState),
    NotFound(ErrorState),
    Conflict(ErrorState),
    Internal(ErrorState),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(ErrorState::new(message))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(ErrorState::new(message))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(ErrorState::new(message))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(ErrorState::new(message))
    }

    pub fn with_details(mut self, details: Value) -> Self {
        match &mut self {
            Self::BadRequest(s) | Self::NotFound(s) | Self::Conflict(s) | Self::Internal(s) => {
                s.details = Some(details)
            }
        }
        self
    }
}

impl From<CourierError> for ApiError {
    fn from(err: CourierError) -> Self {
        match err {
            CourierError::InvalidIntent { intent_id, message } => {
                let api = ApiError::bad_request(message);
                match intent_id {
                    Some(id) => api.with_details(json!({ "intentId": id })),
                    None => api,
                }
            }
            CourierError::UnknownSubmissionTarget { ref target } => {
                ApiError::bad_request(err.to_string())
                    .with_details(json!({ "submissionTarget": target }))
            }
            CourierError::IdempotencyConflict(ref conflict) => {
                let details = json!({
                    "intentId": conflict.intent_id,
                    "existing": {
                        "submissionTarget": conflict.existing_target,
                        "payloadHash": conflict.existing_payload_hash,
                        "payload": conflict.existing_payload,
                        "status": conflict.existing_status,
                    },
                    "incoming": {
                        "submissionTarget": conflict.incoming_target,
                        "payloadHash": conflict.incoming_payload_hash,
                        "payload": conflict.incoming_payload,
                    },
                });
                ApiError::conflict(format!(
                    "intent {} already exists with a different target or payload",
                    conflict.intent_id
                ))
                .with_details(details)
            }
            CourierError::NotFound { .. } => ApiError::not_found(err.to_string()),
            other => {
                error!(error = %other, "request failed");
                ApiError::internal(other.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(format!("invalid query: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, state) = match self {
            Self::BadRequest(s) => (StatusCode::BAD_REQUEST, "invalid_argument", s),
            Self::NotFound(s) => (StatusCode::NOT_FOUND, "not_found", s),
            Self::Conflict(s) => (StatusCode::CONFLICT, "idempotency_conflict", s),
            Self::Internal(s) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", s),
        };
        let body = ErrorEnvelope {
            request_id: uuid::Uuid::new_v4().to_string(),
            error: ErrorBody {
                code,
                message: state.message,
                details: state.details,
            },
        };
        (status, Json(body)).into_response()
    }
}

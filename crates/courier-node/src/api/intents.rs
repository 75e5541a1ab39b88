//! Intent API endpoints.

use std::time::Duration;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use courier_core::{IntentHistory, IntentSnapshot, NewIntent};
use serde::Deserialize;
use tracing::debug;

use super::error::ApiError;
use crate::state::AppState;

/// Request to submit an intent. Missing fields surface as validation errors.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitIntentRequest {
    #[serde(default)]
    pub intent_id: String,

    #[serde(default)]
    pub submission_target: String,

    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitParams {
    /// Seconds to block for the first attempt; capped by configuration.
    pub wait_seconds: Option<u64>,
}

/// `POST /v1/intents?waitSeconds=N`
pub async fn submit_intent(
    State(state): State<AppState>,
    params: Result<Query<SubmitParams>, QueryRejection>,
    body: Result<Json<SubmitIntentRequest>, JsonRejection>,
) -> Result<Json<IntentSnapshot>, ApiError> {
    let Query(params) = params?;
    let Json(req) = body?;

    let intent = NewIntent::new(req.intent_id, req.submission_target, req.payload);
    let outcome = state.manager.submit_intent(intent).await?;
    let mut record = outcome.intent;

    let wait = params.wait_seconds.unwrap_or(0);
    if wait > 0 && !record.is_terminal() {
        debug!(intent_id = %record.intent_id, wait_seconds = wait, "waiting for first attempt");
        if let Some(latest) = state
            .manager
            .wait_for_intent(&record.intent_id, Duration::from_secs(wait))
            .await?
        {
            record = latest;
        }
    }

    Ok(Json(IntentSnapshot::from(&record)))
}

/// `GET /v1/intents/{id}`
pub async fn get_intent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IntentSnapshot>, ApiError> {
    let record = state
        .manager
        .get_intent_row(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("intent {} not found", id)))?;
    Ok(Json(IntentSnapshot::from(&record)))
}

/// `GET /v1/intents/{id}/history`
pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IntentHistory>, ApiError> {
    let record = state
        .manager
        .get_intent(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("intent {} not found", id)))?;
    Ok(Json(IntentHistory::from(&record)))
}

//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// `leader` or `follower`.
    pub role: &'static str,
    pub holder_id: String,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let role = if state.manager.is_leader() {
        "leader"
    } else {
        "follower"
    };
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        role,
        holder_id: state.holder_id.to_string(),
    })
}

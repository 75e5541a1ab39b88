//! The gateway seam.

use async_trait::async_trait;
use courier_core::{GatewayOutcome, Result, TargetContract};

/// One gateway call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRequest {
    pub intent_id: String,
    pub attempt_number: u32,
    pub gateway_type: String,
    pub gateway_url: String,
    pub payload: serde_json::Value,
}

impl ExecRequest {
    pub fn new(
        intent_id: &str,
        attempt_number: u32,
        contract: &TargetContract,
        payload: &serde_json::Value,
    ) -> Self {
        Self {
            intent_id: intent_id.to_string(),
            attempt_number,
            gateway_type: contract.gateway_type.clone(),
            gateway_url: contract.gateway_url.clone(),
            payload: payload.clone(),
        }
    }
}

/// Delivers one attempt to a downstream gateway.
///
/// Any 2xx gateway response is an `Ok` outcome, whatever its status string.
/// Transport failures and non-2xx responses are errors. The engine never
/// looks past that distinction.
#[async_trait]
pub trait AttemptExecutor: Send + Sync {
    async fn exec(&self, request: ExecRequest) -> Result<GatewayOutcome>;
}

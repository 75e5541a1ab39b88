//! HTTP gateway client.

use std::time::Duration;

use async_trait::async_trait;
use courier_core::{CourierError, GatewayOutcome, Result};
use courier_engine::{AttemptExecutor, ExecRequest};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewayRequest<'a> {
    intent_id: &'a str,
    attempt_number: u32,
    gateway_type: &'a str,
    payload: &'a serde_json::Value,
}

/// Posts attempts to the contract's gateway URL.
///
/// Any 2xx response must carry a `{status, reason}` JSON body; everything
/// else is an attempt error.
#[derive(Debug, Clone)]
pub struct HttpAttemptExecutor {
    client: reqwest::Client,
}

impl HttpAttemptExecutor {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CourierError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

fn gateway_error(message: impl Into<String>) -> CourierError {
    CourierError::Gateway {
        message: message.into(),
    }
}

#[async_trait]
impl AttemptExecutor for HttpAttemptExecutor {
    async fn exec(&self, request: ExecRequest) -> Result<GatewayOutcome> {
        let body = GatewayRequest {
            intent_id: &request.intent_id,
            attempt_number: request.attempt_number,
            gateway_type: &request.gateway_type,
            payload: &request.payload,
        };

        let response = self
            .client
            .post(&request.gateway_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| gateway_error(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(gateway_error(format!("gateway returned {}", status)));
        }

        let outcome: GatewayOutcome = response
            .json()
            .await
            .map_err(|e| gateway_error(format!("unreadable gateway response: {}", e)))?;
        debug!(
            intent_id = %request.intent_id,
            attempt = request.attempt_number,
            status = %outcome.status,
            reason = %outcome.reason,
            "gateway responded"
        );
        Ok(outcome)
    }
}

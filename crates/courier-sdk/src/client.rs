//! Courier client implementation.

use std::time::Duration;

use courier_core::{
    CourierError, IdempotencyConflict, IntentHistory, IntentSnapshot, IntentStatus, NewIntent,
    Result,
};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Body of `POST /v1/intents`.
pub type SubmitRequest = NewIntent;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Option<Value>,
}

/// Client for a courier node.
#[derive(Clone)]
pub struct CourierClient {
    /// Base URL of the node.
    base_url: String,

    http_client: reqwest::Client,
}

fn connection_error(err: reqwest::Error) -> CourierError {
    CourierError::Connection(err.to_string())
}

impl CourierClient {
    /// Connect to a node, verifying it answers its health check.
    pub async fn connect(url: &str) -> Result<Self> {
        let base_url = url.trim_end_matches('/').to_string();
        let http_client = reqwest::Client::new();

        http_client
            .get(format!("{}/health", base_url))
            .send()
            .await
            .map_err(connection_error)?
            .error_for_status()
            .map_err(connection_error)?;

        Ok(Self {
            base_url,
            http_client,
        })
    }

    /// Submit an intent, optionally blocking up to `wait_seconds` for its
    /// first attempt.
    ///
    /// Resubmitting the same intent returns the stored one; a different
    /// target or payload under the same id is an
    /// [`CourierError::IdempotencyConflict`].
    pub async fn submit(
        &self,
        request: &SubmitRequest,
        wait_seconds: Option<u64>,
    ) -> Result<IntentSnapshot> {
        let mut builder = self
            .http_client
            .post(format!("{}/v1/intents", self.base_url))
            .json(request);
        if let Some(wait) = wait_seconds {
            builder = builder.query(&[("waitSeconds", wait)]);
        }

        let response = builder.send().await.map_err(connection_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response, &request.intent_id).await);
        }
        response
            .json()
            .await
            .map_err(|e| CourierError::Serialization(e.to_string()))
    }

    /// Current snapshot, or `None` if the node does not know the intent.
    pub async fn get(&self, intent_id: &str) -> Result<Option<IntentSnapshot>> {
        self.fetch(format!("{}/v1/intents/{}", self.base_url, intent_id), intent_id)
            .await
    }

    /// Snapshot plus the ordered attempt list.
    pub async fn history(&self, intent_id: &str) -> Result<Option<IntentHistory>> {
        self.fetch(
            format!("{}/v1/intents/{}/history", self.base_url, intent_id),
            intent_id,
        )
        .await
    }

    /// Poll until the intent is terminal or `timeout` elapses, returning the
    /// last snapshot seen either way.
    pub async fn wait_until_terminal(
        &self,
        intent_id: &str,
        poll: Duration,
        timeout: Duration,
    ) -> Result<IntentSnapshot> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snapshot = self.get(intent_id).await?.ok_or_else(|| CourierError::NotFound {
                resource_type: "Intent".to_string(),
                id: intent_id.to_string(),
            })?;
            if snapshot.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(snapshot);
            }
            debug!(intent_id = %intent_id, status = %snapshot.status, "intent still pending");
            tokio::time::sleep(poll).await;
        }
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        intent_id: &str,
    ) -> Result<Option<T>> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(connection_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response, intent_id).await);
        }
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| CourierError::Serialization(e.to_string()))
    }
}

async fn error_from_response(response: reqwest::Response, intent_id: &str) -> CourierError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    error_from_envelope(status, &text, intent_id)
}

/// Map a node error response back onto [`CourierError`].
fn error_from_envelope(status: StatusCode, text: &str, intent_id: &str) -> CourierError {
    let body = serde_json::from_str::<ErrorEnvelope>(text).ok().map(|e| e.error);
    let message = body
        .as_ref()
        .map(|b| b.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("node returned {}: {}", status, text));
    let details = body.and_then(|b| b.details).unwrap_or(Value::Null);

    match status {
        StatusCode::CONFLICT => match conflict_from_details(&details, intent_id) {
            Some(conflict) => CourierError::IdempotencyConflict(Box::new(conflict)),
            None => CourierError::Internal(message),
        },
        StatusCode::BAD_REQUEST => match details.get("submissionTarget").and_then(Value::as_str) {
            Some(target) => CourierError::UnknownSubmissionTarget {
                target: target.to_string(),
            },
            None => CourierError::InvalidIntent {
                intent_id: Some(intent_id.to_string()).filter(|id| !id.is_empty()),
                message,
            },
        },
        StatusCode::NOT_FOUND => CourierError::NotFound {
            resource_type: "Intent".to_string(),
            id: intent_id.to_string(),
        },
        _ => CourierError::Internal(message),
    }
}

fn conflict_from_details(details: &Value, intent_id: &str) -> Option<IdempotencyConflict> {
    let existing = details.get("existing")?;
    let incoming = details.get("incoming")?;
    let text = |side: &Value, key: &str| {
        side.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let existing_status: IntentStatus =
        serde_json::from_value(existing.get("status")?.clone()).ok()?;

    Some(IdempotencyConflict {
        intent_id: details
            .get("intentId")
            .and_then(Value::as_str)
            .unwrap_or(intent_id)
            .to_string(),
        existing_target: text(existing, "submissionTarget"),
        incoming_target: text(incoming, "submissionTarget"),
        existing_payload: existing.get("payload").cloned().unwrap_or(Value::Null),
        incoming_payload: incoming.get("payload").cloned().unwrap_or(Value::Null),
        existing_payload_hash: text(existing, "payloadHash"),
        incoming_payload_hash: text(incoming, "payloadHash"),
        existing_status,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    fn snapshot(id: &str, status: &str, attempts: u32) -> Value {
        json!({
            "intentId": id,
            "submissionTarget": "sms.realtime",
            "status": status,
            "createdAt": "2026-01-01T00:00:00Z",
            "completedAt": null,
            "attemptCount": attempts,
            "nextAttemptAt": null,
            "finalOutcome": null,
            "exhaustedReason": null,
            "webhook": {"status": "none", "lastAttemptAt": null, "deliveredAt": null, "lastError": null},
        })
    }

    async fn node() -> String {
        let polls = Arc::new(AtomicU32::new(0));
        let app = Router::new()
            .route("/health", get(|| async { Json(json!({"status": "healthy"})) }))
            .route(
                "/v1/intents",
                post(|Json(body): Json<Value>| async move {
                    if body["payload"]["message"] == "changed" {
                        let envelope = json!({
                            "requestId": "r-1",
                            "error": {
                                "code": "idempotency_conflict",
                                "message": "intent intent-1 already exists",
                                "details": {
                                    "intentId": "intent-1",
                                    "existing": {"submissionTarget": "sms.realtime", "payloadHash": "aa", "payload": {"message": "hello"}, "status": "pending"},
                                    "incoming": {"submissionTarget": "sms.realtime", "payloadHash": "bb", "payload": {"message": "changed"}},
                                },
                            },
                        });
                        return (AxumStatus::CONFLICT, Json(envelope)).into_response();
                    }
                    Json(snapshot("intent-1", "pending", 0)).into_response()
                }),
            )
            .route(
                "/v1/intents/:id",
                get(move |Path(id): Path<String>| {
                    let polls = polls.clone();
                    async move {
                        if id != "intent-1" {
                            return AxumStatus::NOT_FOUND.into_response();
                        }
                        let n = polls.fetch_add(1, Ordering::SeqCst);
                        let status = if n >= 2 { "accepted" } else { "pending" };
                        Json(snapshot(&id, status, n.min(1))).into_response()
                    }
                }),
            )
            .route(
                "/v1/intents/:id/history",
                get(|Path(id): Path<String>| async move {
                    let mut body = snapshot(&id, "accepted", 1);
                    body["attempts"] = json!([{
                        "number": 1,
                        "startedAt": "2026-01-01T00:00:00Z",
                        "finishedAt": "2026-01-01T00:00:01Z",
                        "gatewayOutcome": {"status": "accepted", "reason": ""},
                        "error": null,
                    }]);
                    Json(body)
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        url
    }

    fn request(message: &str) -> SubmitRequest {
        NewIntent::new(
            "intent-1",
            "sms.realtime",
            json!({"to": "+15550100", "message": message}),
        )
    }

    #[tokio::test]
    async fn submit_and_read_back() {
        let client = CourierClient::connect(&node().await).await.unwrap();

        let submitted = client.submit(&request("hello"), Some(1)).await.unwrap();
        assert_eq!(submitted.status, IntentStatus::Pending);

        let history = client.history("intent-1").await.unwrap().unwrap();
        assert_eq!(history.attempts.len(), 1);
        assert_eq!(history.intent.status, IntentStatus::Accepted);

        assert!(client.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conflicts_come_back_typed() {
        let client = CourierClient::connect(&node().await).await.unwrap();

        let err = client.submit(&request("changed"), None).await.unwrap_err();
        let CourierError::IdempotencyConflict(conflict) = err else {
            panic!("expected an idempotency conflict");
        };
        assert_eq!(conflict.existing_payload_hash, "aa");
        assert_eq!(conflict.incoming_payload_hash, "bb");
        assert_eq!(conflict.incoming_payload["message"], "changed");
        assert_eq!(conflict.existing_status, IntentStatus::Pending);
    }

    #[tokio::test]
    async fn wait_until_terminal_polls() {
        let client = CourierClient::connect(&node().await).await.unwrap();
        let snapshot = client
            .wait_until_terminal("intent-1", Duration::from_millis(10), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(snapshot.status, IntentStatus::Accepted);

        let missing = client
            .wait_until_terminal("missing", Duration::from_millis(10), Duration::from_secs(1))
            .await;
        assert!(matches!(missing, Err(CourierError::NotFound { .. })));
    }

    #[tokio::test]
    async fn connect_fails_without_a_node() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = CourierClient::connect(&format!("http://{}", addr)).await;
        assert!(matches!(result, Err(CourierError::Connection(_))));
    }

    #[test]
    fn bad_requests_map_to_validation_errors() {
        let body = r#"{"requestId":"r","error":{"code":"invalid_argument","message":"Unknown submission target: fax","details":{"submissionTarget":"fax"}}}"#;
        let err = error_from_envelope(StatusCode::BAD_REQUEST, body, "intent-1");
        assert!(matches!(err, CourierError::UnknownSubmissionTarget { ref target } if target == "fax"));

        let err = error_from_envelope(StatusCode::BAD_REQUEST, "garbage", "intent-1");
        assert!(matches!(err, CourierError::InvalidIntent { .. }));

        let err = error_from_envelope(StatusCode::BAD_GATEWAY, "", "intent-1");
        assert!(matches!(err, CourierError::Internal(_)));
    }
}

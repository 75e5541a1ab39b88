//! HTTP webhook sender with HMAC-SHA256 signing.
//!
//! When the contract names a `secret_env`, the raw body is signed with the
//! secret and the signature is sent in `X-Courier-Signature-256` as
//! `sha256=<hex>`.

use std::time::Duration;

use async_trait::async_trait;
use courier_core::{CourierError, Result};
use courier_engine::{WebhookDelivery, WebhookSender};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Courier-Signature-256";

/// Computes the HMAC-SHA256 signature of a payload using the given secret.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| webhook_error(e.to_string()))?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Formats a signature as `sha256=<hex>`.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

fn webhook_error(message: impl Into<String>) -> CourierError {
    CourierError::Webhook {
        message: message.into(),
    }
}

/// Every header to send with `delivery`, with environment references
/// resolved through `lookup`. A missing variable is a delivery error.
pub fn resolve_headers<F>(
    delivery: &WebhookDelivery,
    body: &[u8],
    lookup: F,
) -> Result<Vec<(String, String)>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut headers: Vec<(String, String)> = delivery
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    for (name, var) in &delivery.headers_env {
        let value = lookup(var).ok_or_else(|| {
            webhook_error(format!("environment variable {} for header {} is not set", var, name))
        })?;
        headers.push((name.clone(), value));
    }

    if let Some(var) = &delivery.secret_env {
        let secret = lookup(var)
            .ok_or_else(|| webhook_error(format!("signing secret {} is not set", var)))?;
        let signature = compute_signature(body, secret.as_bytes())?;
        headers.push((
            SIGNATURE_HEADER.to_string(),
            format_signature_header(&signature),
        ));
    }

    Ok(headers)
}

#[derive(Debug, Clone)]
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CourierError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, delivery: &WebhookDelivery) -> Result<()> {
        let body = serde_json::to_vec(&delivery.body)?;
        let headers = resolve_headers(delivery, &body, |var| std::env::var(var).ok())?;

        let mut request = self
            .client
            .post(&delivery.url)
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| webhook_error(format!("request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(webhook_error(format!("webhook endpoint returned {}", status)));
        }
        debug!(intent_id = %delivery.intent_id, url = %delivery.url, "webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex};

    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    fn delivery(url: &str) -> WebhookDelivery {
        WebhookDelivery {
            intent_id: "intent-1".to_string(),
            url: url.to_string(),
            headers: BTreeMap::from([("X-Static".to_string(), "yes".to_string())]),
            headers_env: BTreeMap::from([(
                "Authorization".to_string(),
                "COURIER_TEST_HOOK_TOKEN".to_string(),
            )]),
            secret_env: Some("COURIER_TEST_HOOK_SECRET".to_string()),
            body: json!({"eventType": "intent.accepted", "intentId": "intent-1"}),
        }
    }

    #[test]
    fn signature_matches_known_vector() {
        let signature = compute_signature(b"what do ya want for nothing?", b"Jefe").unwrap();
        assert_eq!(
            format_signature_header(&signature),
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn headers_resolve_from_the_environment() {
        let env = HashMap::from([
            ("COURIER_TEST_HOOK_TOKEN", "Bearer t0ken"),
            ("COURIER_TEST_HOOK_SECRET", "s3cret"),
        ]);
        let lookup = |var: &str| env.get(var).map(|v| v.to_string());
        let body = b"{}";

        let headers = resolve_headers(&delivery("http://hooks.local"), body, lookup).unwrap();
        let headers: HashMap<_, _> = headers.into_iter().collect();
        assert_eq!(headers["X-Static"], "yes");
        assert_eq!(headers["Authorization"], "Bearer t0ken");
        let expected = format_signature_header(&compute_signature(body, b"s3cret").unwrap());
        assert_eq!(headers[SIGNATURE_HEADER], expected);
    }

    #[test]
    fn missing_environment_is_a_delivery_error() {
        let result = resolve_headers(&delivery("http://hooks.local"), b"{}", |_| None);
        assert!(matches!(result, Err(CourierError::Webhook { .. })));
    }

    #[tokio::test]
    async fn sends_signed_body_and_reports_failures() {
        std::env::set_var("COURIER_TEST_HOOK_TOKEN", "Bearer t0ken");
        std::env::set_var("COURIER_TEST_HOOK_SECRET", "s3cret");

        let seen: Arc<Mutex<Vec<(HeaderMap, Vec<u8>)>>> = Arc::default();
        let app = {
            let seen = seen.clone();
            Router::new()
                .route(
                    "/hook",
                    post(move |headers: HeaderMap, body: axum::body::Bytes| {
                        let seen = seen.clone();
                        async move {
                            seen.lock().unwrap().push((headers, body.to_vec()));
                            StatusCode::NO_CONTENT
                        }
                    }),
                )
                .route("/broken", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let sender = HttpWebhookSender::new(Duration::from_secs(5)).unwrap();
        sender.send(&delivery(&format!("{}/hook", base))).await.unwrap();

        let (headers, body) = seen.lock().unwrap().pop().unwrap();
        let expected = format_signature_header(&compute_signature(&body, b"s3cret").unwrap());
        assert_eq!(headers[SIGNATURE_HEADER], expected.as_str());
        assert_eq!(headers["authorization"], "Bearer t0ken");
        assert_eq!(headers["content-type"], "application/json");
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["eventType"], "intent.accepted");

        let err = sender
            .send(&delivery(&format!("{}/broken", base)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}

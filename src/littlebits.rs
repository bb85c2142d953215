//! littleBits cloud API client.
//!
//! Every request goes to the hub's HTTP API with the same three headers:
//! a Bearer token, the v2 vendor media type in `Accept`, and a JSON
//! `Content-Type`. Response bodies carry nothing we need, so a call either
//! succeeds (status < 300) or fails with the path and status line.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use tracing::{debug, error};

const ACCEPT_V2: &str = "application/vnd.littlebits.v2+json";

/// Output level meaning "off".
pub const STOP_PERCENT: u8 = 0;
/// Duration meaning "until told otherwise"; paired with [`STOP_PERCENT`] to silence the actuator.
pub const STOP_DURATION_MS: i64 = -1;

/// The subset of the device hub the relay talks to.
#[async_trait]
pub trait DeviceApi: Send + Sync + 'static {
    /// Subscribe `subscriber_url` to `events` published by `publisher_id`.
    async fn create_subscription(
        &self,
        publisher_id: &str,
        subscriber_url: &str,
        events: &[String],
    ) -> Result<()>;

    async fn delete_subscription(&self, publisher_id: &str, subscriber_url: &str) -> Result<()>;

    /// Drive the device's output at `percent` for `duration_ms` (-1 = indefinitely).
    async fn set_output(&self, device_id: &str, percent: u8, duration_ms: i64) -> Result<()>;
}

#[derive(Serialize, Debug)]
struct SubscriptionRequest<'a> {
    publisher_id: &'a str,
    subscriber_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    publisher_events: Option<&'a [String]>,
}

#[derive(Serialize, Debug)]
struct OutputRequest {
    percent: u8,
    duration_ms: i64,
}

/// HTTP client for the littleBits cloud API.
#[derive(Clone)]
pub struct LittleBits {
    base_url: String,
    access_token: String,
    http: reqwest::Client,
}

impl LittleBits {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: access_token.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Send one request and check the status. Never retried.
    async fn request<B: Serialize>(&self, method: Method, path: &str, body: &B) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);

        debug!(%method, path, "littleBits API request");

        let response = self
            .http
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", ACCEPT_V2)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| anyhow!("failed to do {path} request: {e}"))?;

        let status = response.status();
        // Drain the body so the connection can be reused.
        let body_text = response.text().await.unwrap_or_default();

        if status.as_u16() > 299 {
            error!(%status, body = %body_text, path, "littleBits API HTTP error");
            return Err(anyhow!("failed to do {path} request: {status}"));
        }

        debug!(%status, path, "littleBits API response OK");
        Ok(())
    }
}

#[async_trait]
impl DeviceApi for LittleBits {
    async fn create_subscription(
        &self,
        publisher_id: &str,
        subscriber_url: &str,
        events: &[String],
    ) -> Result<()> {
        let body = SubscriptionRequest {
            publisher_id,
            subscriber_id: subscriber_url,
            publisher_events: Some(events),
        };
        self.request(Method::POST, "/subscriptions", &body).await
    }

    async fn delete_subscription(&self, publisher_id: &str, subscriber_url: &str) -> Result<()> {
        let body = SubscriptionRequest {
            publisher_id,
            subscriber_id: subscriber_url,
            publisher_events: None,
        };
        self.request(Method::DELETE, "/subscriptions", &body).await
    }

    async fn set_output(&self, device_id: &str, percent: u8, duration_ms: i64) -> Result<()> {
        let path = format!("/v2/devices/{}/output", urlencoding::encode(device_id));
        let body = OutputRequest {
            percent,
            duration_ms,
        };
        self.request(Method::POST, &path, &body).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{
        extract::State,
        http::{HeaderMap, Method as HttpMethod, StatusCode, Uri},
        Router,
    };
    use serde_json::{json, Value};

    use super::*;

    #[derive(Debug, Clone)]
    struct Recorded {
        method: String,
        path: String,
        headers: HeaderMap,
        body: Value,
    }

    #[derive(Clone)]
    struct Hub {
        seen: Arc<Mutex<Vec<Recorded>>>,
        status: StatusCode,
    }

    async fn record(
        State(hub): State<Hub>,
        method: HttpMethod,
        uri: Uri,
        headers: HeaderMap,
        body: String,
    ) -> StatusCode {
        hub.seen.lock().unwrap().push(Recorded {
            method: method.to_string(),
            path: uri.path().to_string(),
            headers,
            body: serde_json::from_str(&body).unwrap_or(Value::Null),
        });
        hub.status
    }

    /// Spin up a local stand-in for the hub that answers every request with `status`.
    async fn fake_hub(status: StatusCode) -> (String, Arc<Mutex<Vec<Recorded>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new().fallback(record).with_state(Hub {
            seen: seen.clone(),
            status,
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    #[tokio::test]
    async fn set_output_posts_fixed_headers_and_body() {
        let (base, seen) = fake_hub(StatusCode::OK).await;
        let client = LittleBits::new(base, "secret-token");

        client.set_output("00e04c1efff8", 100, 32000).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let req = &seen[0];
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/v2/devices/00e04c1efff8/output");
        assert_eq!(req.headers["authorization"], "Bearer secret-token");
        assert_eq!(req.headers["accept"], ACCEPT_V2);
        assert_eq!(req.headers["content-type"], "application/json");
        assert_eq!(req.body, json!({"percent": 100, "duration_ms": 32000}));
    }

    #[tokio::test]
    async fn create_subscription_body() {
        let (base, seen) = fake_hub(StatusCode::CREATED).await;
        let client = LittleBits::new(base, "t");

        client
            .create_subscription(
                "00e04c1efff8",
                "https://relay.example/events",
                &["amplitude:delta:ignite".to_string()],
            )
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].path, "/subscriptions");
        assert_eq!(
            seen[0].body,
            json!({
                "publisher_id": "00e04c1efff8",
                "subscriber_id": "https://relay.example/events",
                "publisher_events": ["amplitude:delta:ignite"],
            })
        );
    }

    #[tokio::test]
    async fn delete_subscription_uses_delete_without_events() {
        let (base, seen) = fake_hub(StatusCode::NO_CONTENT).await;
        let client = LittleBits::new(base, "t");

        client
            .delete_subscription("00e04c1efff8", "https://relay.example/events")
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].method, "DELETE");
        assert_eq!(
            seen[0].body,
            json!({
                "publisher_id": "00e04c1efff8",
                "subscriber_id": "https://relay.example/events",
            })
        );
    }

    #[tokio::test]
    async fn non_2xx_is_an_upstream_error() {
        let (base, seen) = fake_hub(StatusCode::FORBIDDEN).await;
        let client = LittleBits::new(base, "t");

        let err = client
            .set_output("dev", STOP_PERCENT, STOP_DURATION_MS)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "failed to do /v2/devices/dev/output request: 403 Forbidden"
        );
        // Exactly one attempt, no retry.
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_hub_is_an_upstream_error() {
        // Port 9 (discard) on loopback is almost never listening.
        let client = LittleBits::new("http://127.0.0.1:9", "t");
        let err = client.set_output("dev", 100, 1000).await.unwrap_err();
        assert!(err
            .to_string()
            .starts_with("failed to do /v2/devices/dev/output request:"));
    }
}

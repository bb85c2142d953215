//! Shared fixtures for handler tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use crate::catalog::MessagePicker;
use crate::channel::ChannelHub;
use crate::config::Config;
use crate::littlebits::DeviceApi;
use crate::repository::Repository;
use crate::store::{DocumentStore, MemoryStore};
use crate::AppState;

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateSubscription {
        publisher_id: String,
        subscriber_url: String,
        events: Vec<String>,
    },
    DeleteSubscription {
        publisher_id: String,
        subscriber_url: String,
    },
    SetOutput {
        device_id: String,
        percent: u8,
        duration_ms: i64,
    },
}

/// Records every call; fails them all while `failing` is set.
#[derive(Default)]
pub struct FakeDevice {
    pub calls: Mutex<Vec<DeviceCall>>,
    pub failing: AtomicBool,
}

impl FakeDevice {
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: DeviceCall, path: &str) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!(
                "failed to do {path} request: 500 Internal Server Error"
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceApi for FakeDevice {
    async fn create_subscription(
        &self,
        publisher_id: &str,
        subscriber_url: &str,
        events: &[String],
    ) -> Result<()> {
        self.record(
            DeviceCall::CreateSubscription {
                publisher_id: publisher_id.into(),
                subscriber_url: subscriber_url.into(),
                events: events.to_vec(),
            },
            "/subscriptions",
        )
    }

    async fn delete_subscription(&self, publisher_id: &str, subscriber_url: &str) -> Result<()> {
        self.record(
            DeviceCall::DeleteSubscription {
                publisher_id: publisher_id.into(),
                subscriber_url: subscriber_url.into(),
            },
            "/subscriptions",
        )
    }

    async fn set_output(&self, device_id: &str, percent: u8, duration_ms: i64) -> Result<()> {
        self.record(
            DeviceCall::SetOutput {
                device_id: device_id.into(),
                percent,
                duration_ms,
            },
            &format!("/v2/devices/{device_id}/output"),
        )
    }
}

/// A store whose every operation fails.
pub struct BrokenStore;

#[async_trait]
impl DocumentStore for BrokenStore {
    async fn get(&self, _kind: &str, _key: &str) -> Result<Option<Value>> {
        Err(anyhow!("connection refused"))
    }

    async fn put(&self, _kind: &str, _key: &str, _doc: Value) -> Result<()> {
        Err(anyhow!("connection refused"))
    }

    async fn delete(&self, _kind: &str, _key: &str) -> Result<()> {
        Err(anyhow!("connection refused"))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub device: Arc<FakeDevice>,
}

impl Default for TestApp {
    fn default() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_broken_store() -> Self {
        Self::with_store(Arc::new(BrokenStore))
    }

    fn with_store(store: Arc<dyn DocumentStore>) -> Self {
        let config = Config::for_tests("http://hub.test");
        let device = Arc::new(FakeDevice::default());
        let state = AppState {
            picker: MessagePicker::new(config.selection_seed),
            config: Arc::new(config),
            device: device.clone(),
            repo: Repository::new(store),
            channels: ChannelHub::new(),
        };
        Self { state, device }
    }
}

/// Run one request through the full router.
pub async fn call(state: &AppState, method: Method, uri: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request");
    crate::router(state.clone())
        .oneshot(request)
        .await
        .expect("response")
}

pub async fn call_with_body(state: &AppState, method: Method, uri: &str, body: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    crate::router(state.clone())
        .oneshot(request)
        .await
        .expect("response")
}

pub async fn body_text(resp: Response) -> String {
    let bytes = resp.into_body().collect().await.expect("body").to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub async fn body_json(resp: Response) -> Value {
    serde_json::from_str(&body_text(resp).await).expect("json body")
}

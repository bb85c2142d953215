//! Device event webhook and the poller's status endpoint.
//!
//! The hub posts to `/events` whenever the subscribed input fires. We only
//! subscribe to one event type, so the body is not inspected: any POST picks
//! a new message, stores it, and drives the actuator for 32 seconds.

use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::repository::{CurrentMessage, CURRENT_MESSAGE};
use crate::AppState;

const EVENT_OUTPUT_PERCENT: u8 = 100;
const EVENT_OUTPUT_DURATION_MS: i64 = 32_000;

/// Inbound hub notification, e.g.
/// `{device_id, user_id, timestamp, type: "amplitude", payload: {absolute, percent, delta, level}}`.
/// Parsed only for logging.
#[derive(Deserialize, Debug)]
struct DeviceEvent {
    device_id: Option<String>,
    user_id: Option<i64>,
    timestamp: Option<i64>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    #[allow(dead_code)]
    payload: Option<EventPayload>,
}

#[derive(Deserialize, Debug)]
struct EventPayload {
    /// Reserved. The hub's type for this field is unknown.
    #[allow(dead_code)]
    absolute: Option<serde_json::Value>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
struct PollResponse {
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/events",
            post(ingest_event)
                .fallback(|| async { AppError::MethodNotAllowed { allow: "POST" } }),
        )
        .route("/poll", get(poll))
}

async fn ingest_event(State(state): State<AppState>, body: Bytes) -> AppResult<&'static str> {
    if let Ok(event) = serde_json::from_slice::<DeviceEvent>(&body) {
        debug!(
            device_id = event.device_id.as_deref().unwrap_or("-"),
            user_id = ?event.user_id,
            timestamp = ?event.timestamp,
            event_type = event.event_type.as_deref().unwrap_or("-"),
            "Device event received"
        );
    }

    let picked = state.picker.pick();
    let msg = CurrentMessage {
        created_at: Utc::now(),
        url: picked.url.to_string(),
        duration_ms: picked.duration.as_millis() as i64,
    };

    state
        .repo
        .put_current_message(&msg)
        .await
        .map_err(|e| AppError::upstream(format!("failed to put {CURRENT_MESSAGE} to store"), e))?;

    info!(url = %msg.url, duration_ms = msg.duration_ms, "Selected message");

    state
        .device
        .set_output(
            &state.config.device_id,
            EVENT_OUTPUT_PERCENT,
            EVENT_OUTPUT_DURATION_MS,
        )
        .await
        .map_err(|e| AppError::upstream("failed to send output to device", e))?;

    Ok("ok!")
}

async fn poll(State(state): State<AppState>) -> AppResult<Json<PollResponse>> {
    let msg = state
        .repo
        .current_message()
        .await
        .map_err(|e| AppError::upstream(format!("failed to get {CURRENT_MESSAGE}"), e))?;

    let response = match msg {
        None => PollResponse {
            found: false,
            url: None,
            duration_ms: None,
            created: None,
        },
        Some(msg) => PollResponse {
            found: true,
            url: Some(msg.url),
            duration_ms: Some(msg.duration_ms),
            created: Some(msg.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        },
    };

    Ok(Json(response))
}

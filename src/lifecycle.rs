//! One-shot operator actions: subscribe, unsubscribe, stop, and a test pulse.

use axum::{extract::State, routing::get, Router};
use tracing::{error, info};

use crate::error::{AppError, AppResult};
use crate::littlebits::{STOP_DURATION_MS, STOP_PERCENT};
use crate::repository::CURRENT_MESSAGE;
use crate::AppState;

const PULSE_PERCENT: u8 = 100;
const PULSE_DURATION_MS: i64 = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/setup", get(setup))
        .route("/teardown", get(teardown))
        .route("/stop", get(stop))
        .route("/test", get(pulse))
}

/// Subscribe this relay's `/events` URL to the device. The hub decides
/// whether a repeat call replaces or duplicates the subscription.
async fn setup(State(state): State<AppState>) -> AppResult<&'static str> {
    let config = &state.config;
    state
        .device
        .create_subscription(
            &config.device_id,
            &config.subscriber_url,
            &config.publisher_events,
        )
        .await
        .map_err(|e| AppError::upstream("failed to create new subscription", e))?;

    info!(
        publisher_id = %config.device_id,
        subscriber_url = %config.subscriber_url,
        events = ?config.publisher_events,
        "Subscription created"
    );
    Ok("ok!")
}

async fn teardown(State(state): State<AppState>) -> AppResult<&'static str> {
    let config = &state.config;
    state
        .device
        .delete_subscription(&config.device_id, &config.subscriber_url)
        .await
        .map_err(|e| AppError::upstream("failed to delete subscription", e))?;

    info!(subscriber_url = %config.subscriber_url, "Subscription deleted");
    Ok("ok!")
}

/// Silence the actuator and forget the current message. The response only
/// reflects the output command.
async fn stop(State(state): State<AppState>) -> AppResult<&'static str> {
    let result = state
        .device
        .set_output(&state.config.device_id, STOP_PERCENT, STOP_DURATION_MS)
        .await;

    if let Err(e) = state.repo.delete_current_message().await {
        error!("failed to delete {CURRENT_MESSAGE}: {e:#}");
    }

    result.map_err(|e| AppError::upstream("failed to send output to device", e))?;
    Ok("ok!")
}

async fn pulse(State(state): State<AppState>) -> AppResult<String> {
    state
        .device
        .set_output(&state.config.device_id, PULSE_PERCENT, PULSE_DURATION_MS)
        .await
        .map_err(|e| AppError::upstream("failed to POST output to device", e))?;

    Ok(format!(
        "successfully wrote: percent={PULSE_PERCENT}&duration_ms={PULSE_DURATION_MS}\n"
    ))
}

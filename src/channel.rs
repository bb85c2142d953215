//! Browser push channel.
//!
//! A browser registers a client id and gets back a token. It then opens
//! `GET /channel?token=...` as a WebSocket; anything sent to its client id
//! is forwarded as a JSON text frame. Only the most recently registered
//! client is remembered in the store, so `/ping` always targets that one.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{Extensions, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::repository::{ChannelInfo, CHANNEL_INFO};
use crate::AppState;

/// Frames buffered per client before sends start failing.
const CLIENT_BUFFER: usize = 16;

// ── Hub ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct ChannelHub {
    inner: Arc<RwLock<HubInner>>,
}

#[derive(Default)]
struct HubInner {
    /// token -> client id
    tokens: HashMap<String, String>,
    /// client id -> live connection
    clients: HashMap<String, mpsc::Sender<String>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a connect token for `client_id`. Only the latest registration is
    /// served: tokens and connections of any other client are dropped.
    pub async fn create_token(&self, client_id: &str) -> Result<String> {
        let token = generate_token();
        let mut inner = self.inner.write().await;
        inner.tokens.clear();
        inner.clients.retain(|id, _| id == client_id);
        inner.tokens.insert(token.clone(), client_id.to_string());
        Ok(token)
    }

    /// Exchange a single-use token for the client's delivery stream. A newer
    /// connection for the same client replaces the older one.
    pub async fn connect(&self, token: &str) -> Result<(String, mpsc::Receiver<String>)> {
        let mut inner = self.inner.write().await;
        let client_id = inner
            .tokens
            .remove(token)
            .ok_or_else(|| anyhow!("unknown channel token"))?;

        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        inner.clients.insert(client_id.clone(), tx);
        Ok((client_id, rx))
    }

    pub async fn send_json<T: Serialize>(&self, client_id: &str, payload: &T) -> Result<()> {
        let text = serde_json::to_string(payload)?;

        let tx = self
            .inner
            .read()
            .await
            .clients
            .get(client_id)
            .cloned()
            .ok_or_else(|| anyhow!("client {client_id:?} is not connected"))?;

        tx.try_send(text)
            .map_err(|e| anyhow!("failed to deliver to {client_id:?}: {e}"))
    }

    /// Drop connections whose socket has gone away.
    async fn prune(&self) {
        self.inner
            .write()
            .await
            .clients
            .retain(|_, tx| !tx.is_closed());
    }

    #[cfg(test)]
    async fn outstanding_tokens(&self) -> usize {
        self.inner.read().await.tokens.len()
    }
}

/// 32 random bytes, hex encoded.
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ── Router ──────────────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", get(register).post(register))
        .route("/ping", get(ping))
        .route("/channel", get(channel_socket))
}

// ── Handlers ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RegisterResponse {
    token: String,
}

#[derive(Serialize)]
struct PushNotification {
    msg: &'static str,
}

async fn register(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    extensions: Extensions,
) -> AppResult<Json<RegisterResponse>> {
    // First value wins when the key is repeated.
    let client_id = params
        .into_iter()
        .find(|(name, _)| name == "clientId")
        .map(|(_, value)| value)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Validation("missing required query param \"clientId\"".into()))?;

    let info = ChannelInfo {
        created_at: Utc::now(),
        remote_addr: crate::client_ip(&headers, &extensions),
        client_id,
    };

    state
        .repo
        .put_channel_info(&info)
        .await
        .map_err(|e| AppError::upstream(format!("failed to put {CHANNEL_INFO} to store"), e))?;

    let token = state
        .channels
        .create_token(&info.client_id)
        .await
        .map_err(|e| {
            AppError::upstream(format!("failed to create channel {:?}", info.client_id), e)
        })?;

    info!(client_id = %info.client_id, remote_addr = %info.remote_addr, "Channel registered");
    debug!(client_id = %info.client_id, %token, "Created channel token");

    Ok(Json(RegisterResponse { token }))
}

async fn ping(State(state): State<AppState>) -> AppResult<StatusCode> {
    let info = match state.repo.channel_info().await {
        Ok(Some(info)) => info,
        Ok(None) => {
            return Err(AppError::Upstream(format!(
                "failed to get {CHANNEL_INFO} from store"
            )))
        }
        Err(e) => {
            return Err(AppError::upstream(
                format!("failed to get {CHANNEL_INFO} from store"),
                e,
            ))
        }
    };

    debug!(client_id = %info.client_id, "Fetched {CHANNEL_INFO} from store");

    let payload = PushNotification { msg: "hi!" };
    if let Err(e) = state.channels.send_json(&info.client_id, &payload).await {
        error!(client_id = %info.client_id, "failed to send channel notification: {e:#}");
    }

    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct ChannelParams {
    token: Option<String>,
}

async fn channel_socket(
    State(state): State<AppState>,
    Query(params): Query<ChannelParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, StatusCode> {
    let token = params.token.unwrap_or_default();
    let (client_id, rx) = state.channels.connect(&token).await.map_err(|e| {
        warn!("Rejected channel connection: {e}");
        StatusCode::UNAUTHORIZED
    })?;

    // The token is spent either way; the dropped receiver reads as a closed client.
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(client_id = %client_id, "Channel request was not a WebSocket upgrade");
            return Ok(rejection.into_response());
        }
    };

    info!(client_id = %client_id, "Channel opened");
    let hub = state.channels.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        handle_socket(socket, rx).await;
        hub.prune().await;
        info!(client_id = %client_id, "Channel closed");
    }))
}

async fn handle_socket(mut socket: WebSocket, mut rx: mpsc::Receiver<String>) {
    loop {
        tokio::select! {
            // Forward notifications to the browser
            outgoing = rx.recv() => {
                match outgoing {
                    Some(text) => {
                        if socket.send(Message::text(text)).await.is_err() {
                            break;
                        }
                    }
                    // Replaced by a newer connection for the same client
                    None => break,
                }
            }
            // Handle incoming frames (ping/pong/close)
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}

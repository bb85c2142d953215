mod catalog;
mod channel;
mod config;
mod error;
mod events;
mod lifecycle;
mod littlebits;
mod repository;
mod store;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path},
    http::{header, Extensions, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use include_dir::{include_dir, Dir};
use mime_guess::from_path;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

use catalog::MessagePicker;
use channel::ChannelHub;
use config::Config;
use littlebits::{DeviceApi, LittleBits};
use repository::Repository;
use store::{DocumentStore, MemoryStore, PgStore};

// Poller and channel test pages, embedded at compile time
static ASSETS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/static");

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub device: Arc<dyn DeviceApi>,
    pub repo: Repository,
    pub picker: MessagePicker,
    pub channels: ChannelHub,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (development).
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "littlebits_relay=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(url) => Arc::new(PgStore::connect(url).await?),
        None => {
            warn!("DATABASE_URL not set, state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState {
        device: Arc::new(LittleBits::new(&config.api_url, &config.access_token)),
        repo: Repository::new(store),
        picker: MessagePicker::new(config.selection_seed),
        channels: ChannelHub::new(),
        config: Arc::new(config),
    };

    let addr = state.config.bind_addr.clone();
    let app = router(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                let client_ip = client_ip(request.headers(), request.extensions());
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    client_ip = %client_ip,
                )
            })
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    info!("littlebits-relay listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/static/{*path}", get(static_file))
        .merge(events::router())
        .merge(lifecycle::router())
        .merge(channel::router())
        .with_state(state)
}

/// Caller address: first `x-forwarded-for` hop, else the socket peer, else `-`.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "-".into())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

static INDEX_HTML: &str = r#"<html>
<body>
<p><a href="/static/poller.html">poller</a></p>
<p><a href="/static/channel.html">channel</a></p>
<p><a href="/setup">setup</a></p>
<p><a href="/stop">stop</a></p>
</body>
</html>
"#;

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn static_file(Path(path): Path<String>) -> Response {
    match ASSETS.get_file(&path) {
        Some(file) => {
            let content_type = from_path(&path).first_or_octet_stream();
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, content_type.to_string()),
                    (
                        header::CACHE_CONTROL,
                        "public, max-age=3600, must-revalidate".to_string(),
                    ),
                ],
                file.contents(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

//! HTTP and WebSocket handlers for the Beacon server.
//!
//! This module wires the relay into axum: the WebSocket endpoint, the
//! status routes and the publish front-end.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, DefaultBodyLimit, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use beacon_core::{ClientSummary, Media, PublishRequest, Relay, ValidationError};
use beacon_transport::{FrameSink, WebSocketSink};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The relay endpoint.
    pub relay: Relay,
    /// Server configuration.
    pub config: Config,
    /// Process start, for the uptime report.
    pub started_at: Instant,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            relay: Relay::new(config.notification_policy()).with_send_timeout(config.send_timeout()),
            config,
            started_at: Instant::now(),
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    let publish_limit = state.config.publish_body_limit();

    let mut app = Router::new()
        .route("/", get(root_handler))
        .route("/clients", get(clients_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route(
            "/publish",
            post(publish_handler).layer(DefaultBodyLimit::max(publish_limit)),
        );

    if ws_path != "/" {
        app = app.route(&ws_path, get(ws_handler));
    }

    app.with_state(state)
}

/// Run the HTTP/WebSocket server until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let heartbeat = state
        .relay
        .heartbeat(config.heartbeat_config())
        .spawn_with(metrics::record_sweep);

    // Bind and serve
    let listener = TcpListener::bind(addr).await?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app(Arc::clone(&state)).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
    .await?;

    heartbeat.stop();
    info!("Beacon server stopped");
    Ok(())
}

/// Wait for ctrl-c or SIGTERM, then run the relay shutdown sequence.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received ctrl-c, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }

    let notified = state.relay.shutdown().await;
    info!(notified, "Subscribers notified of shutdown");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// `GET /`: WebSocket upgrade when requested, service info otherwise.
async fn root_handler(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    match ws {
        Some(ws) if state.config.transport.websocket_path == "/" => {
            upgrade(ws, state, connect_info.map(|ConnectInfo(addr)| addr))
        }
        _ => Json(serde_json::json!({
            "status": "online",
            "name": "beacon",
            "version": env!("CARGO_PKG_VERSION"),
            "connectedClients": state.relay.registry().len(),
        }))
        .into_response(),
    }
}

/// WebSocket upgrade handler for a dedicated path.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(ws, state, connect_info.map(|ConnectInfo(addr)| addr))
}

fn upgrade(ws: WebSocketUpgrade, state: Arc<AppState>, remote_addr: Option<SocketAddr>) -> Response {
    if !state.relay.is_accepting() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, remote_addr))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, remote_addr: Option<SocketAddr>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (sender, mut receiver) = socket.split();
    let sink = Arc::new(WebSocketSink::new(sender));

    let id = match state.relay.accept(sink.clone(), remote_addr).await {
        Ok(id) => id,
        Err(e) => {
            debug!(remote = ?remote_addr, error = %e, "Connection not accepted");
            return;
        }
    };

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                metrics::record_message(text.len(), "text");
                state.relay.handle_text(id, &text);
            }
            Ok(Message::Binary(data)) => {
                metrics::record_message(data.len(), "binary");
                state.relay.handle_binary(id, &data);
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Protocol-level control frames; tungstenite answers pings.
            }
            Ok(Message::Close(_)) => {
                debug!(connection = %id, "Received close frame");
                break;
            }
            Err(e) => {
                warn!(connection = %id, error = %e, "WebSocket error");
                metrics::record_error("websocket");
                break;
            }
        }
    }

    sink.mark_closed();
    state.relay.disconnect(id);
}

#[derive(Serialize)]
struct ClientsResponse {
    count: usize,
    clients: Vec<ClientSummary>,
}

/// `GET /clients`: every registered connection.
async fn clients_handler(State(state): State<Arc<AppState>>) -> Json<ClientsResponse> {
    let clients = state.relay.connected_summary();
    Json(ClientsResponse {
        count: clients.len(),
        clients,
    })
}

/// `GET /status`: connected count and uptime.
async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed();
    Json(serde_json::json!({
        "status": "online",
        "connectedClients": state.relay.registry().len(),
        "uptime": format_uptime(uptime),
        "uptimeSeconds": uptime.as_secs(),
    }))
}

/// Format an uptime as `1d 2h 3m 4s`, omitting zero parts.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let parts = [
        (total / 86_400, 'd'),
        (total % 86_400 / 3_600, 'h'),
        (total % 3_600 / 60, 'm'),
        (total % 60, 's'),
    ];

    let formatted: Vec<String> = parts
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();

    if formatted.is_empty() {
        "0s".to_string()
    } else {
        formatted.join(" ")
    }
}

/// Body of `POST /publish`.
#[derive(Debug, Deserialize)]
pub struct PublishBody {
    sender: String,
    #[serde(default)]
    message: Option<String>,
    /// Requested display duration in seconds.
    #[serde(default)]
    duration: Option<u64>,
    /// Deliver only to the first subscriber with this identity.
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    media: Option<MediaBody>,
}

/// Inline media in a publish body.
#[derive(Debug, Deserialize)]
pub struct MediaBody {
    #[serde(rename = "type")]
    mime_type: String,
    #[serde(default)]
    filename: String,
    /// Base64 encoded bytes.
    data: String,
}

#[derive(Debug, Serialize)]
struct PublishResponse {
    delivered: bool,
    recipients: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<&'static str>,
}

/// `POST /publish`: validate and fan out one notification.
async fn publish_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PublishBody>,
) -> Response {
    let started = Instant::now();

    let mut request = PublishRequest::new(body.sender);
    request.text = body.message;
    request.duration_secs = body.duration;
    if let Some(media) = body.media {
        match BASE64.decode(media.data.as_bytes()) {
            Ok(bytes) => request.media = Some(Media::new(bytes, media.mime_type, media.filename)),
            Err(e) => {
                metrics::record_publish("rejected", 0, started.elapsed().as_secs_f64());
                return reject(format!("Invalid media data: {e}"));
            }
        }
    }

    let result = match body.target {
        Some(target) => state
            .relay
            .publish_to(&target, request)
            .await
            .map(usize::from),
        None => state.relay.publish(request).await,
    };

    match result {
        Ok(recipients) => {
            let outcome = if recipients == 0 { "no-subscribers" } else { "delivered" };
            metrics::record_publish(outcome, recipients, started.elapsed().as_secs_f64());
            Json(PublishResponse {
                delivered: recipients > 0,
                recipients,
                outcome: (recipients == 0).then_some(outcome),
            })
            .into_response()
        }
        Err(e) => {
            metrics::record_publish("rejected", 0, started.elapsed().as_secs_f64());
            reject_validation(&e)
        }
    }
}

fn reject_validation(error: &ValidationError) -> Response {
    debug!(error = %error, "Publish rejected");
    reject(error.to_string())
}

fn reject(message: String) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

//! HTTP and WebSocket handlers for the relay server.
//!
//! Each upgraded socket is split into its two halves and handed to the
//! core relay, which runs the connection until either side gives up.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tenvis_relay_core::Relay;
use tenvis_relay_transport::websocket;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// How often relay stats are mirrored into the metrics exporter.
const STATS_EXPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// The broadcast relay.
    pub relay: Relay,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state and start the broadcast hub.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            relay: Relay::spawn(config.relay_config()),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    serve(listener, config).await
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config));
    // Stops when serving ends.
    let _exporter = metrics::spawn_stats_exporter(state.relay.clone(), STATS_EXPORT_INTERVAL);

    let addr = listener.local_addr()?;
    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    let app = app(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

/// Build the router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "stats": state.relay.stats(),
    }))
}

/// Transport-level cap on a single frame.
///
/// Frames up to this size reach the decoder, which rejects anything over
/// `max_message_size` as oversized; larger frames fail in the transport.
fn transport_frame_limit(max_message_size: usize) -> usize {
    max_message_size
        .saturating_mul(2)
        .max(max_message_size.saturating_add(1))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let limits = &state.config.limits;
    if state.relay.registry().len() >= limits.max_connections {
        warn!(remote = %addr, limit = limits.max_connections, "Connection limit reached");
        metrics::record_rejection();
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    let frame_limit = transport_frame_limit(state.relay.config().max_message_size);
    ws.max_message_size(frame_limit)
        .max_frame_size(frame_limit)
        .on_upgrade(move |socket| handle_websocket(socket, addr, state))
}

/// Handle an upgraded WebSocket connection.
async fn handle_websocket(socket: WebSocket, addr: SocketAddr, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (source, sink) = websocket::split(socket, Some(addr));
    let session = match state.relay.attach(source, sink) {
        Ok(session) => session,
        Err(e) => {
            error!(remote = %addr, error = %e, "Failed to register connection");
            return;
        }
    };

    let id = session.id();
    let reason = session.wait().await;
    metrics::record_close(&reason);
    debug!(connection = %id, remote = %addr, reason = %reason, "WebSocket disconnected");
}

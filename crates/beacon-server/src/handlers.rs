//! HTTP handlers for the Beacon server.
//!
//! This module owns the router: the WebSocket upgrade endpoint and the
//! health check.

use crate::auth::{AuthError, JwtAuthenticator};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::metrics;
use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use beacon_core::Hub;
use beacon_transport::websocket;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// Admits and starts connections.
    pub dispatcher: Dispatcher,
    /// Server configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new app state, starting a hub coordinator.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_hub(config, Hub::spawn())
    }

    /// Create app state around an existing hub.
    #[must_use]
    pub fn with_hub(config: Config, hub: Hub) -> Self {
        let auth = Arc::new(JwtAuthenticator::from_config(&config.auth));
        let dispatcher = Dispatcher::new(hub, auth, config.connection.to_connection_config());

        Self {
            dispatcher,
            config: Arc::new(config),
        }
    }

    /// The hub; the handle producers use to deliver events.
    #[must_use]
    pub fn hub(&self) -> &Hub {
        self.dispatcher.hub()
    }
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = AppState::new(config.clone());

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let reporter = metrics::spawn_hub_reporter(
        state.hub().clone(),
        Duration::from_millis(config.metrics.report_interval_ms.max(1)),
    );

    let app = build_router(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    reporter.abort();
    info!("Beacon server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.hub().stats();

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "online_identities": stats.online_identities,
        "connections": stats.connections,
        "events_delivered": stats.events_delivered,
        "events_dropped": stats.events_dropped,
    }))
}

/// Query parameters accepted on the upgrade endpoint.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// The token is checked before the upgrade; a refused request gets a plain
/// 401 and never reaches the hub. A query string that cannot be parsed
/// (e.g. a repeated `token` key) counts as carrying no token.
async fn ws_handler(
    ws: Option<WebSocketUpgrade>,
    params: Option<Query<ConnectParams>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<AppState>,
) -> Response {
    let token = params.and_then(|Query(params)| params.token);
    let identity = match state.dispatcher.admit(token.as_deref()) {
        Ok(identity) => identity,
        Err(e) => return unauthorized(&e),
    };

    let Some(ws) = ws else {
        warn!(identity = %identity, "Authenticated request without upgrade headers");
        return (StatusCode::BAD_REQUEST, "websocket upgrade required").into_response();
    };

    let max_frame_size = state.dispatcher.connection_config().max_frame_size;
    let remote = connect_info.map(|ConnectInfo(addr)| addr.to_string());

    ws.max_message_size(max_frame_size)
        .max_frame_size(max_frame_size)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = websocket::split(socket, max_frame_size, remote);
            state.dispatcher.attach(identity, sink, stream);
        })
}

fn unauthorized(err: &AuthError) -> Response {
    // Expired and otherwise invalid tokens look the same to the client.
    let body = match err {
        AuthError::MissingToken => "missing token",
        AuthError::InvalidToken | AuthError::ExpiredToken => "invalid token",
    };
    (StatusCode::UNAUTHORIZED, body).into_response()
}

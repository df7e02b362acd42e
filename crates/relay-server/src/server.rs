//! `RelayServer`: Axum HTTP + WebSocket server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::constants::IDENTITY_PARAM;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::hub::Hub;
use crate::metrics;
use crate::router::MessageRouter;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{SessionContext, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry and group index.
    pub hub: Arc<Hub>,
    /// Handed to every upgraded socket.
    pub session: SessionContext,
    /// Upper bound on a single inbound frame.
    pub max_message_size: usize,
    /// When the server started.
    pub start_time: Instant,
    /// Renders `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// A bound, running listener.
#[derive(Debug)]
pub struct ServerHandle {
    /// Address actually bound (useful when the configured port is `0`).
    pub addr: SocketAddr,
    /// The serve task. Completes after shutdown is signalled.
    pub task: JoinHandle<()>,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    hub: Arc<Hub>,
    router: Arc<MessageRouter>,
    shutdown: ShutdownCoordinator,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a server with a fresh hub sized from `config`.
    pub fn new(config: ServerConfig) -> Self {
        let hub = Arc::new(Hub::new(config.max_connections));
        Self {
            router: Arc::new(MessageRouter::new(Arc::clone(&hub))),
            hub,
            config,
            shutdown: ShutdownCoordinator::new(),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            session: SessionContext {
                router: Arc::clone(&self.router),
                config: self.config.session_config(),
                shutdown: self.shutdown.token(),
            },
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown is signalled.
    pub async fn listen(&self) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        info!(%addr, "relay listening");
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });
        Ok(ServerHandle { addr, task })
    }

    /// Signal shutdown and close every registered socket.
    ///
    /// Returns the number of sockets that were open.
    pub fn stop(&self) -> usize {
        self.shutdown.shutdown();
        self.hub.stop()
    }

    /// The shared hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET / and GET /ws: upgrade to a relay socket. The identity comes from
/// `?id=`.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    let identity = params.get(IDENTITY_PARAM).cloned();
    let ctx = state.session;
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            let _ = run_ws_session(socket, identity, ctx).await;
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.is_stopped() || state.session.shutdown.is_cancelled(),
        state.hub.client_count(),
        state.hub.group_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => metrics::render(&handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

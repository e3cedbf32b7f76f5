//! `Server` — Axum HTTP + WebSocket front end over one dispatch table.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use tether_core::SessionId;
use tether_tools::Dispatcher;

use crate::auth::{AllowAll, Authenticator, StaticToken};
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::http::{rpc_handler, schemas_handler};
use crate::websocket::manager::SessionManager;
use crate::websocket::session::run_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Dispatch table shared by every transport.
    pub dispatcher: Arc<Dispatcher>,
    /// Live WebSocket sessions.
    pub sessions: Arc<SessionManager>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Admission check applied at WebSocket upgrade.
    pub auth: Arc<dyn Authenticator>,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
    /// When the server started.
    pub start_time: Instant,
}

/// The Tether server.
pub struct Server {
    config: Arc<ServerConfig>,
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<SessionManager>,
    auth: Arc<dyn Authenticator>,
    shutdown: CancellationToken,
    start_time: Instant,
}

impl Server {
    /// Creates a server around a dispatch table.
    ///
    /// Configuring [`ServerConfig::auth_token`] swaps the open-door
    /// admission policy for a static bearer token check.
    #[must_use]
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        let auth: Arc<dyn Authenticator> = match &config.auth_token {
            Some(token) => Arc::new(StaticToken::new(token.clone())),
            None => Arc::new(AllowAll),
        };
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            sessions: Arc::new(SessionManager::new()),
            auth,
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
        }
    }

    /// Builds the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: Arc::clone(&self.dispatcher),
            sessions: Arc::clone(&self.sessions),
            config: Arc::clone(&self.config),
            auth: Arc::clone(&self.auth),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/rpc", post(rpc_handler))
            .route("/schemas", get(schemas_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Binds the configured address and starts serving.
    ///
    /// Returns once the listener is bound; serving continues on a
    /// background task until [`Server::shutdown`] is called.
    pub async fn listen(&self) -> Result<ServerHandle, ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "server listening");

        let router = self.router();
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            let serve =
                axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned());
            if let Err(err) = serve.await {
                error!(error = %err, "server exited with error");
            }
        });

        Ok(ServerHandle {
            addr: local_addr,
            task,
        })
    }

    /// Begins graceful shutdown: stops accepting connections and tells
    /// every live session to close.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.shutdown.cancel();
    }

    /// The dispatch table.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Live WebSocket sessions, for event pushes.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Handle for a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener actually bound. With port `0` this carries
    /// the assigned port.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Waits for the serve loop to finish draining after shutdown.
    pub async fn stopped(self) {
        let _ = self.task.await;
    }
}

/// Errors from starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The configured address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that failed to bind.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Listener inspection failed after binding.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// GET /ws — admission check, then upgrade into a session.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    if !state.auth.authenticate(&headers, &query) {
        warn!("websocket upgrade rejected: authentication failed");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let session_id = SessionId::new();
    ws.on_upgrade(move |socket| {
        run_session(
            socket,
            session_id,
            state.dispatcher,
            state.sessions,
            state.config,
            state.shutdown,
        )
    })
    .into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = state.sessions.count().await;
    Json(health::health_check(state.start_time, sessions))
}

//! `NotifyServer`: Axum HTTP + `WebSocket` front end.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use notify_core::UserId;
use notify_hub::{Client, HubHandle};
use notify_settings::{ConnectionSettings, NotifySettings};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::health::{self, HealthResponse};
use crate::identity::{Anonymous, IdentityResolver};
use crate::shutdown::ShutdownCoordinator;
use crate::transport;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hub the upgraded sockets are bound to.
    pub hub: HubHandle,
    /// Per-connection limits and keepalive timing.
    pub connection: ConnectionSettings,
    /// Resolves the owning user of each upgrade request.
    pub identity: Arc<dyn IdentityResolver>,
    /// When the server started.
    pub start_time: Instant,
    /// Consulted so upgrades are refused once shutdown begins.
    pub shutdown: Arc<ShutdownCoordinator>,
}

/// The notification server.
pub struct NotifyServer {
    settings: NotifySettings,
    hub: HubHandle,
    identity: Arc<dyn IdentityResolver>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl NotifyServer {
    /// Create a server bound to `hub`. Connections are anonymous until
    /// [`with_identity`](Self::with_identity) installs a resolver.
    pub fn new(settings: NotifySettings, hub: HubHandle) -> Self {
        Self {
            settings,
            hub,
            identity: Arc::new(Anonymous),
            shutdown: Arc::new(ShutdownCoordinator::default()),
            start_time: Instant::now(),
        }
    }

    /// Replace the identity resolver.
    #[must_use]
    pub fn with_identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            connection: self.settings.connection.clone(),
            identity: self.identity.clone(),
            start_time: self.start_time,
            shutdown: self.shutdown.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown is signalled.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "notify server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server failed");
            }
        });
        Ok((local_addr, handle))
    }

    /// The hub handle.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The effective settings.
    pub fn settings(&self) -> &NotifySettings {
        &self.settings
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, &state.hub).await)
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let user_id = state.identity.resolve(&headers, &query);
    let limit = state.connection.max_message_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_failed_upgrade(|e| warn!(error = %e, "failed to upgrade connection"))
        .on_upgrade(move |socket| run_ws_session(socket, state, user_id))
}

#[instrument(skip_all, fields(user = ?user_id))]
async fn run_ws_session(socket: WebSocket, state: AppState, user_id: Option<UserId>) {
    let client = Client::new(state.hub, transport::adapt(socket), user_id, &state.connection);
    let conn_id = client.connection().id();
    debug!(%conn_id, "websocket upgraded");

    match client.serve().await {
        Ok(tasks) => {
            let (writer, reader) = tasks.join().await;
            debug!(%conn_id, ?writer, ?reader, "websocket session ended");
        }
        Err(e) => warn!(%conn_id, error = %e, "hub unavailable, dropping connection"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use notify_hub::Hub;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn make_server() -> NotifyServer {
        let settings = NotifySettings::default();
        let (hub, handle) = Hub::new(&settings.hub);
        drop(tokio::spawn(hub.run(CancellationToken::new())));
        NotifyServer::new(settings, handle)
    }

    #[tokio::test]
    async fn health_endpoint_reports_connections() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["users"], 0);
    }

    #[tokio::test]
    async fn ws_without_upgrade_headers_is_rejected() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_on_ephemeral_port_and_stop() {
        let mut settings = NotifySettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;
        let (hub, handle) = Hub::new(&settings.hub);
        let server = NotifyServer::new(settings, handle);
        let hub_task = tokio::spawn(hub.run(server.shutdown().token()));

        let (addr, serve_task) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        let finished = server
            .shutdown()
            .graceful_shutdown(vec![serve_task, hub_task], Some(std::time::Duration::from_secs(5)))
            .await;
        assert!(finished);
    }
}

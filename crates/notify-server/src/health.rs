//! `/health` endpoint.

use std::time::Instant;

use notify_hub::HubHandle;
use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the listener is serving.
    pub status: &'static str,
    /// Whole seconds since the server was created.
    pub uptime_secs: u64,
    /// Sockets currently registered with the hub.
    pub connections: usize,
    /// Distinct identified users among those sockets.
    pub users: usize,
}

/// Snapshot the hub's registry for a health probe.
pub async fn health_check(start_time: Instant, hub: &HubHandle) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        connections: hub.connection_count().await,
        users: hub.user_count().await,
    }
}

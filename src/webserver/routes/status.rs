use axum::{extract::State, response::Response, routing::get, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::{
    arguments::is_debug_webserver_enabled,
    logger::{self, LogTag},
    webserver::{state::AppState, utils::success_response, ws::metrics::HubMetricsSnapshot},
};

/// Plain-text body served at `/`
pub const LIVENESS_TEXT: &str = "Vitals relay is running";

/// Simple health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

/// Relay status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub uptime_seconds: u64,
    pub active_connections: usize,
    pub max_connections: usize,
    pub hub: HubMetricsSnapshot,
}

/// Create status routes
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(relay_status))
}

/// GET /
pub async fn liveness() -> &'static str {
    LIVENESS_TEXT
}

/// GET /api/health
async fn health_check() -> Response {
    if is_debug_webserver_enabled() {
        logger::debug(LogTag::Webserver, "Health check endpoint called");
    }

    let response = HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    success_response(response)
}

/// GET /api/status
async fn relay_status(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = StatusResponse {
        timestamp: Utc::now(),
        uptime_seconds: state.uptime_seconds(),
        active_connections: state.ws_connection_count(),
        max_connections: state.config.max_connections,
        hub: state.hub.metrics().snapshot(),
    };

    if is_debug_webserver_enabled() {
        logger::debug(
            LogTag::Webserver,
            &format!(
                "Status snapshot ready (uptime={}s, connections={}, ingested={})",
                snapshot.uptime_seconds, snapshot.active_connections, snapshot.hub.frames_ingested
            ),
        );
    }

    success_response(snapshot)
}

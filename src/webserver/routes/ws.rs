/// WebSocket endpoint
///
/// Upgrades `/ws` and hands the socket to the relay's connection handler.
/// Upgrades past the configured connection cap are refused with 503 before
/// the handshake completes.
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Router,
};

use crate::{
    arguments::is_debug_webserver_enabled,
    logger::{self, LogTag},
    webserver::{state::AppState, utils::error_response, ws::connection::handle_connection},
};

/// Create WebSocket routes
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let active = state.ws_connection_count();
    let limit = state.config.max_connections;

    if active >= limit {
        logger::warning(
            LogTag::Webserver,
            &format!(
                "Refusing WebSocket upgrade: {} connections open (limit {})",
                active, limit
            ),
        );
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "connection limit reached");
    }

    if is_debug_webserver_enabled() {
        logger::debug(
            LogTag::Webserver,
            &format!("WebSocket upgrade requested (active={})", active),
        );
    }

    let hub = Arc::clone(&state.hub);
    ws.max_message_size(state.config.max_frame_bytes)
        .max_frame_size(state.config.max_frame_bytes)
        .on_upgrade(move |socket| handle_connection(socket, hub))
}

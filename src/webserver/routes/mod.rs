use crate::webserver::state::AppState;
use axum::{routing::get, Router};
use std::sync::Arc;

pub mod history;
pub mod status;
pub mod ws;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(status::liveness))
        .route("/history", get(history::history))
        .merge(ws::routes())
        .nest("/api", api_routes())
        .with_state(state)
}

/// JSON API routes
fn api_routes() -> Router<Arc<AppState>> {
    Router::new().merge(status::routes())
}

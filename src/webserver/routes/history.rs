/// GET /history - most recent persisted readings, newest first
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    arguments::is_debug_webserver_enabled,
    logger::{self, LogTag},
    webserver::{
        state::AppState,
        utils::{error_response, success_response},
    },
};

/// Readings returned when the caller gives no usable limit
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Upper bound on a single history response
pub const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<String>,
}

/// Resolve the `limit` query parameter
///
/// The leading integer of the value is used (`"25abc"` is 25). Absent,
/// non-numeric, zero and negative values fall back to the default; large
/// values are capped.
pub fn resolve_limit(raw: Option<&str>) -> usize {
    let Some(raw) = raw else {
        return DEFAULT_HISTORY_LIMIT;
    };

    let trimmed = raw.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits_len == 0 || negative {
        return DEFAULT_HISTORY_LIMIT;
    }

    // Anything too long for usize is certainly above the cap
    match rest[..digits_len].parse::<usize>() {
        Ok(0) => DEFAULT_HISTORY_LIMIT,
        Ok(n) => n.min(MAX_HISTORY_LIMIT),
        Err(_) => MAX_HISTORY_LIMIT,
    }
}

/// GET /history?limit=N
pub async fn history(
    State(state): State<Arc<AppState>>,
    query: Option<Query<HistoryQuery>>,
) -> Response {
    let limit = resolve_limit(query.as_ref().and_then(|q| q.limit.as_deref()));

    match state.store.query(limit).await {
        Ok(readings) => {
            if is_debug_webserver_enabled() {
                logger::debug(
                    LogTag::Webserver,
                    &format!("History: {} readings (limit={})", readings.len(), limit),
                );
            }
            success_response(readings)
        }
        Err(e) => {
            logger::error(
                LogTag::Webserver,
                &format!("Failed to load history: {}", e),
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// WebSocket connection handler
///
/// Lifecycle of one client:
/// - `Connecting`: upgrade accepted by the route
/// - `Open`: registered with the hub; a read loop feeds the hub while a
///   writer task drains the connection's outbound queue
/// - `Closed`: peer close, read error, write error/timeout, or eviction by
///   the hub; terminal
///
/// Deregistration is tied to the `Registration` guard and both socket halves
/// are owned by this function or its writer task, so every exit path
/// releases membership and the transport.
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{
    arguments::is_debug_connection_enabled,
    logger::{self, LogTag},
};

use super::{
    hub::BroadcastHub,
    metrics::ConnectionMetrics,
    registry::{ConnectionId, Frame},
};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame or the stream ended
    PeerClosed,
    ReadError(String),
    WriteError(String),
    WriteTimeout,
    /// Outbound queue closed: the hub evicted this connection
    Evicted,
}

/// Handle a WebSocket connection until it closes
pub async fn handle_connection(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let mut state = ConnectionState::Connecting;

    // Register connection with hub
    let (registration, outbound) = hub.registry().register();
    let conn_id = registration.id();
    transition(conn_id, &mut state, ConnectionState::Open);

    let (ws_tx, ws_rx) = socket.split();
    let metrics = ConnectionMetrics::new();

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        outbound,
        hub.write_timeout(),
        Arc::clone(&metrics),
    ));

    let reason = tokio::select! {
        reason = read_loop(ws_rx, Arc::clone(&hub), conn_id, Arc::clone(&metrics)) => {
            // Closing our queue lets the writer flush what it has and exit
            drop(registration);
            match tokio::time::timeout(hub.write_timeout(), &mut writer).await {
                Ok(_) => {}
                Err(_) => writer.abort(),
            }
            reason
        }
        result = &mut writer => {
            drop(registration);
            match result {
                Ok(reason) => reason,
                Err(e) => CloseReason::WriteError(format!("writer task failed: {}", e)),
            }
        }
    };

    transition(conn_id, &mut state, ConnectionState::Closed);

    let snapshot = metrics.snapshot();
    match &reason {
        CloseReason::PeerClosed | CloseReason::Evicted => {
            if is_debug_connection_enabled() {
                logger::debug(
                    LogTag::Connection,
                    &format!(
                        "Connection {} closed: {:?} (received={}, sent={})",
                        conn_id, reason, snapshot.frames_received, snapshot.frames_sent
                    ),
                );
            }
        }
        _ => {
            logger::warning(
                LogTag::Connection,
                &format!(
                    "Connection {} closed: {:?} (received={}, sent={})",
                    conn_id, reason, snapshot.frames_received, snapshot.frames_sent
                ),
            );
        }
    }
}

fn transition(conn_id: ConnectionId, state: &mut ConnectionState, next: ConnectionState) {
    if is_debug_connection_enabled() {
        logger::debug(
            LogTag::Connection,
            &format!("Connection {}: {:?} -> {:?}", conn_id, state, next),
        );
    }
    *state = next;
}

/// Read frames until the peer goes away, handing each to the hub in order
async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    hub: Arc<BroadcastHub>,
    conn_id: ConnectionId,
    metrics: Arc<ConnectionMetrics>,
) -> CloseReason {
    while let Some(msg) = ws_rx.next().await {
        let frame: Frame = match msg {
            Ok(Message::Text(text)) => Arc::from(text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => Arc::from(text),
                Err(_) => {
                    // Same policy as any other undecodable frame
                    if is_debug_connection_enabled() {
                        logger::debug(
                            LogTag::Connection,
                            &format!("Connection {}: non-UTF-8 binary frame ignored", conn_id),
                        );
                    }
                    continue;
                }
            },
            // Pings are answered by the protocol layer
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => return CloseReason::PeerClosed,
            Err(e) => return CloseReason::ReadError(e.to_string()),
        };

        metrics.inc_received();
        if logger::is_verbose_enabled() {
            logger::verbose(
                LogTag::Connection,
                &format!("Connection {} frame: {}", conn_id, frame),
            );
        }
        hub.ingest(frame, conn_id).await;
    }

    CloseReason::PeerClosed
}

/// Drain the outbound queue onto the socket, one bounded write at a time
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    write_timeout: Duration,
    metrics: Arc<ConnectionMetrics>,
) -> CloseReason {
    while let Some(frame) = outbound.recv().await {
        match tokio::time::timeout(write_timeout, ws_tx.send(Message::Text(frame.to_string())))
            .await
        {
            Ok(Ok(())) => metrics.inc_sent(),
            Ok(Err(e)) => return CloseReason::WriteError(e.to_string()),
            Err(_) => return CloseReason::WriteTimeout,
        }
    }

    let _ = tokio::time::timeout(write_timeout, ws_tx.close()).await;
    CloseReason::Evicted
}

/// Connection registry - the live set of open WebSocket clients
///
/// The registry exclusively owns membership. Each member is represented by
/// the sending half of its bounded outbound queue; dropping that sender
/// (deregistration) closes the queue, which ends the connection's writer task
/// and with it the connection.
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};

use crate::{
    arguments::is_debug_connection_enabled,
    logger::{self, LogTag},
};

use super::metrics::HubMetrics;

/// Connection ID (unique per WebSocket connection, never reused)
pub type ConnectionId = u64;

/// A frame exactly as it was received, shared across all recipients
pub type Frame = Arc<str>;

/// Per-connection sender (bounded channel)
pub type ConnectionSender = mpsc::Sender<Frame>;

/// Result of handing one frame to one recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The recipient's queue is gone (connection already closing)
    Closed,
    /// The recipient's queue stayed full for the whole write timeout
    TimedOut,
}

/// A registry member as seen by one fan-out pass
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: ConnectionSender,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame for this connection, waiting at most `timeout` for room
    pub async fn deliver(&self, frame: Frame, timeout: Duration) -> DeliveryOutcome {
        match self.sender.send_timeout(frame, timeout).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(SendTimeoutError::Closed(_)) => DeliveryOutcome::Closed,
            Err(SendTimeoutError::Timeout(_)) => DeliveryOutcome::TimedOut,
        }
    }
}

/// Set of open connections
pub struct ConnectionRegistry {
    /// Active connections (connection_id → sender), ordered by registration
    connections: RwLock<BTreeMap<ConnectionId, ConnectionSender>>,

    /// Next connection ID
    next_conn_id: AtomicU64,

    /// Per-client outbound buffer size
    queue_size: usize,

    metrics: Arc<HubMetrics>,
}

impl ConnectionRegistry {
    /// `queue_size` must be non-zero (enforced by config validation)
    pub fn new(queue_size: usize, metrics: Arc<HubMetrics>) -> Arc<Self> {
        Arc::new(Self {
            connections: RwLock::new(BTreeMap::new()),
            next_conn_id: AtomicU64::new(1),
            queue_size: queue_size.max(1),
            metrics,
        })
    }

    /// Register a new connection
    ///
    /// The returned guard deregisters the connection when dropped; the
    /// receiver yields every frame fanned out to it.
    pub fn register(self: &Arc<Self>) -> (Registration, mpsc::Receiver<Frame>) {
        let id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(self.queue_size);

        let active = {
            let mut connections = self.connections.write();
            connections.insert(id, tx);
            connections.len()
        };
        self.metrics.connection_opened();

        if is_debug_connection_enabled() {
            logger::debug(
                LogTag::Connection,
                &format!("Connection {} registered (active={})", id, active),
            );
        }

        let registration = Registration {
            id,
            registry: Arc::clone(self),
        };
        (registration, rx)
    }

    /// Remove a connection; returns false if it was already gone
    pub fn deregister(&self, id: ConnectionId) -> bool {
        let (removed, active) = {
            let mut connections = self.connections.write();
            let removed = connections.remove(&id).is_some();
            (removed, connections.len())
        };

        if removed {
            self.metrics.connection_closed();
            if is_debug_connection_enabled() {
                logger::debug(
                    LogTag::Connection,
                    &format!("Connection {} deregistered (active={})", id, active),
                );
            }
        }
        removed
    }

    /// Open connections at call time, in registration order
    ///
    /// The lock is released before this returns; callers iterate and send
    /// without blocking registration or deregistration.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections
            .read()
            .iter()
            .map(|(id, sender)| ConnectionHandle {
                id: *id,
                sender: sender.clone(),
            })
            .collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scoped membership: deregisters on drop, on every exit path
pub struct Registration {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the hub has not evicted this connection yet
    pub fn is_registered(&self) -> bool {
        self.registry.contains(self.id)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(queue_size: usize) -> Arc<ConnectionRegistry> {
        ConnectionRegistry::new(queue_size, HubMetrics::new())
    }

    #[test]
    fn test_registration_and_drop() {
        let registry = registry(4);

        let (reg1, _rx1) = registry.register();
        let (reg2, _rx2) = registry.register();
        assert_eq!(registry.len(), 2);
        assert_ne!(reg1.id(), reg2.id());

        drop(reg1);
        assert_eq!(registry.len(), 1);
        assert!(reg2.is_registered());
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let registry = registry(4);
        let (reg, _rx) = registry.register();
        let id = reg.id();

        assert!(registry.deregister(id));
        assert!(!registry.deregister(id));
        assert!(!reg.is_registered());

        // Guard drop after an explicit deregister is a no-op
        drop(reg);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_in_registration_order() {
        let registry = registry(4);
        let regs: Vec<_> = (0..3).map(|_| registry.register()).collect();

        let ids: Vec<_> = registry.snapshot().iter().map(|h| h.id()).collect();
        let expected: Vec<_> = regs.iter().map(|(r, _)| r.id()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_snapshot_survives_concurrent_deregister() {
        let registry = registry(4);
        let (reg, mut rx) = registry.register();

        let snapshot = registry.snapshot();
        registry.deregister(reg.id());

        // The snapshot still holds a sender; the receiver is alive, so the
        // frame lands even though membership changed mid-pass.
        let outcome = snapshot[0]
            .deliver(Arc::from("late"), Duration::from_millis(50))
            .await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(&*rx.recv().await.unwrap(), "late");
    }

    #[tokio::test]
    async fn test_deliver_outcomes() {
        let registry = registry(1);

        let (_reg_full, _rx_full) = registry.register();
        let (_reg_closed, rx_closed) = registry.register();
        drop(rx_closed);

        let snapshot = registry.snapshot();
        let frame: Frame = Arc::from("{}");
        let timeout = Duration::from_millis(20);

        assert_eq!(
            snapshot[0].deliver(frame.clone(), timeout).await,
            DeliveryOutcome::Delivered
        );
        assert_eq!(
            snapshot[0].deliver(frame.clone(), timeout).await,
            DeliveryOutcome::TimedOut
        );
        assert_eq!(
            snapshot[1].deliver(frame, timeout).await,
            DeliveryOutcome::Closed
        );
    }
}

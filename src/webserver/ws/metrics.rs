/// Relay metrics collection
///
/// Lock-free counters for the hub as a whole and for each connection.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// CONNECTION METRICS
// ============================================================================

/// Per-connection metrics (thread-safe)
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    /// Frames read from the client
    frames_received: AtomicU64,

    /// Frames written to the client
    frames_sent: AtomicU64,
}

impl ConnectionMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionMetricsSnapshot {
        ConnectionMetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot (serializable)
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetricsSnapshot {
    pub frames_received: u64,
    pub frames_sent: u64,
}

// ============================================================================
// HUB METRICS
// ============================================================================

/// Hub-level metrics (aggregate across all connections)
#[derive(Debug, Default)]
pub struct HubMetrics {
    /// Total connections (lifetime)
    total_connections: AtomicU64,

    /// Current active connections
    active_connections: AtomicUsize,

    /// Frames handed to the hub
    frames_ingested: AtomicU64,

    /// Frames dropped because they did not decode
    frames_discarded: AtomicU64,

    /// Frames placed on a recipient's outbound queue
    deliveries: AtomicU64,

    /// Recipients removed after a failed delivery
    evictions: AtomicU64,

    /// Readings the store accepted
    readings_persisted: AtomicU64,

    /// Store inserts that returned an error
    persist_failures: AtomicU64,

    /// Readings dropped because the persistence queue was full
    persist_dropped: AtomicU64,

    /// Inserts that outlived the persist timeout
    persist_slow: AtomicU64,
}

impl HubMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn frame_ingested(&self) {
        self.frames_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_discarded(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self, count: u64) {
        self.deliveries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn evicted(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn reading_persisted(&self) {
        self.readings_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persist_failed(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persist_dropped(&self) {
        self.persist_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persist_slow(&self) {
        self.persist_slow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            frames_ingested: self.frames_ingested.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            readings_persisted: self.readings_persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            persist_dropped: self.persist_dropped.load(Ordering::Relaxed),
            persist_slow: self.persist_slow.load(Ordering::Relaxed),
        }
    }
}

/// Hub metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HubMetricsSnapshot {
    pub total_connections: u64,
    pub active_connections: usize,
    pub frames_ingested: u64,
    pub frames_discarded: u64,
    pub deliveries: u64,
    pub evictions: u64,
    pub readings_persisted: u64,
    pub persist_failures: u64,
    pub persist_dropped: u64,
    pub persist_slow: u64,
}

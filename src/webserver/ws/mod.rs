/// Relay WebSocket core
///
/// ## Architecture
/// - Single /ws endpoint; every client is both a potential sensor and a
///   potential viewer
/// - Registry of open connections with per-connection bounded queues
/// - Hub decodes, persists in the background and fans the raw frame out
/// - Slow or dead recipients are evicted instead of stalling a pass
///
/// ## Key Components
/// - `registry`: membership, snapshots, per-delivery outcomes
/// - `hub`: ingest and fan-out
/// - `persist`: bounded background queue in front of the record store
/// - `connection`: upgrade-to-close lifecycle of one client
/// - `metrics`: hub and per-connection counters
pub mod connection;
pub mod hub;
pub mod metrics;
pub mod persist;
pub mod registry;

pub use hub::{BroadcastHub, FanOutReport, HubConfig, IngestOutcome};
pub use registry::{ConnectionId, ConnectionRegistry, DeliveryOutcome, Frame};

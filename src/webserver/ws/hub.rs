/// Broadcast hub - ingest, persist, fan out
///
/// Every inbound frame goes through `ingest`:
/// - frames that are not a JSON object are dropped silently
/// - decoded readings go to the persistence queue (never awaited)
/// - the original frame is delivered verbatim to every registered
///   connection, the sender included
/// - recipients that cannot take the frame within the write timeout are
///   evicted; the pass continues with the rest
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    arguments::is_debug_hub_enabled,
    logger::{self, LogTag},
    reading::Reading,
    store::RecordStore,
};

use super::metrics::HubMetrics;
use super::persist::{PersistConfig, PersistQueue};
use super::registry::{ConnectionId, ConnectionRegistry, DeliveryOutcome, Frame};

// ============================================================================
// HUB TYPES
// ============================================================================

/// Result of one fan-out pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Connections in the snapshot
    pub targets: usize,
    /// Connections that accepted the frame
    pub delivered: usize,
    /// Connections removed because delivery failed
    pub evicted: Vec<ConnectionId>,
}

/// What happened to one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Not a structured message; nothing persisted, nothing sent
    Discarded,
    Broadcast(FanOutReport),
}

/// Hub settings taken from the relay configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub client_queue_size: usize,
    pub write_timeout: Duration,
    pub persist: PersistConfig,
}

// ============================================================================
// BROADCAST HUB
// ============================================================================

pub struct BroadcastHub {
    registry: Arc<ConnectionRegistry>,
    persist: PersistQueue,
    metrics: Arc<HubMetrics>,
    write_timeout: Duration,
}

impl BroadcastHub {
    /// Create the hub and start its persistence dispatcher.
    /// Must be called inside a tokio runtime.
    pub fn new(store: Arc<dyn RecordStore>, config: HubConfig) -> Arc<Self> {
        let metrics = HubMetrics::new();
        let registry = ConnectionRegistry::new(config.client_queue_size, Arc::clone(&metrics));
        let persist = PersistQueue::spawn(store, config.persist, Arc::clone(&metrics));

        Arc::new(Self {
            registry,
            persist,
            metrics,
            write_timeout: config.write_timeout,
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> Arc<HubMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Handle one inbound frame from `origin`. Never fails.
    pub async fn ingest(&self, frame: Frame, origin: ConnectionId) -> IngestOutcome {
        self.metrics.frame_ingested();

        let Some(reading) = Reading::from_frame(&frame, Utc::now()) else {
            self.metrics.frame_discarded();
            if is_debug_hub_enabled() {
                logger::debug(
                    LogTag::Hub,
                    &format!(
                        "Connection {}: non-JSON frame ignored ({} bytes)",
                        origin,
                        frame.len()
                    ),
                );
            }
            return IngestOutcome::Discarded;
        };

        self.persist.enqueue(reading);

        let report = self.fan_out(frame).await;

        if is_debug_hub_enabled() {
            logger::debug(
                LogTag::Hub,
                &format!(
                    "Connection {}: broadcast (targets={}, delivered={}, evicted={})",
                    origin,
                    report.targets,
                    report.delivered,
                    report.evicted.len()
                ),
            );
        }

        IngestOutcome::Broadcast(report)
    }

    /// Deliver `frame` to every connection open at snapshot time
    async fn fan_out(&self, frame: Frame) -> FanOutReport {
        let targets = self.registry.snapshot();
        let mut report = FanOutReport {
            targets: targets.len(),
            ..FanOutReport::default()
        };

        for target in &targets {
            match target.deliver(Arc::clone(&frame), self.write_timeout).await {
                DeliveryOutcome::Delivered => report.delivered += 1,
                outcome => {
                    if self.registry.deregister(target.id()) {
                        logger::warning(
                            LogTag::Hub,
                            &format!(
                                "Connection {}: delivery failed ({:?}), removed from hub",
                                target.id(),
                                outcome
                            ),
                        );
                    }
                    report.evicted.push(target.id());
                }
            }
        }

        self.metrics.delivered(report.delivered as u64);
        self.metrics.evicted(report.evicted.len() as u64);
        report
    }
}

/// Background persistence of readings
///
/// The hub never waits on the store. Readings go onto a bounded queue; a
/// dispatcher task drains it and runs inserts with bounded concurrency.
/// Inserts that outlive the timeout are reported as slow but still hold
/// their slot until the store answers. When the queue is full the newest
/// reading is dropped and counted rather than stalling fan-out.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

use crate::{
    arguments::is_debug_persist_enabled,
    errors::StoreError,
    logger::{self, LogTag},
    reading::Reading,
    store::RecordStore,
};

use super::metrics::HubMetrics;

/// Persistence queue limits
#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Readings waiting for a free worker
    pub queue_size: usize,
    /// Inserts in flight at once
    pub concurrency: usize,
    /// Inserts running longer than this are reported as slow
    pub timeout: Duration,
}

/// Outcome of handing a reading to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queue full, reading dropped
    Dropped,
    /// Dispatcher gone (runtime shutting down)
    Closed,
}

/// Handle to the persistence dispatcher
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<Reading>,
    metrics: Arc<HubMetrics>,
}

impl PersistQueue {
    /// Start the dispatcher task. Must be called inside a tokio runtime.
    pub fn spawn(
        store: Arc<dyn RecordStore>,
        config: PersistConfig,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        tokio::spawn(run_dispatcher(rx, store, config, Arc::clone(&metrics)));
        Self { tx, metrics }
    }

    /// Queue a reading without waiting
    pub fn enqueue(&self, reading: Reading) -> EnqueueOutcome {
        match self.tx.try_send(reading) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.persist_dropped();
                logger::warning(
                    LogTag::Persist,
                    "Persistence queue full, reading dropped",
                );
                EnqueueOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.persist_dropped();
                logger::warning(
                    LogTag::Persist,
                    "Persistence dispatcher stopped, reading dropped",
                );
                EnqueueOutcome::Closed
            }
        }
    }
}

async fn run_dispatcher(
    mut rx: mpsc::Receiver<Reading>,
    store: Arc<dyn RecordStore>,
    config: PersistConfig,
    metrics: Arc<HubMetrics>,
) {
    let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));

    while let Some(reading) = rx.recv().await {
        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let store = Arc::clone(&store);
        let metrics = Arc::clone(&metrics);
        let timeout = config.timeout;
        tokio::spawn(async move {
            persist_one(store.as_ref(), &reading, timeout, &metrics).await;
            drop(permit);
        });
    }

    if is_debug_persist_enabled() {
        logger::debug(LogTag::Persist, "Persistence dispatcher stopped");
    }
}

/// Run one insert to completion
///
/// The permit is held until the store returns, so a slow store never has
/// more than `concurrency` inserts in flight. Passing `timeout` only marks
/// the insert as slow; the store's own busy timeout decides when it fails.
async fn persist_one(
    store: &dyn RecordStore,
    reading: &Reading,
    timeout: Duration,
    metrics: &HubMetrics,
) {
    let insert = store.insert(reading);
    tokio::pin!(insert);

    let result = match tokio::time::timeout(timeout, &mut insert).await {
        Ok(result) => result,
        Err(_) => {
            metrics.persist_slow();
            let e = StoreError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            };
            logger::warning(
                LogTag::Persist,
                &format!("{}, still waiting on the store", e),
            );
            insert.await
        }
    };

    match result {
        Ok(()) => {
            metrics.reading_persisted();
            if is_debug_persist_enabled() {
                logger::debug(
                    LogTag::Persist,
                    &format!(
                        "Persisted reading from {} (bpm={:?}, spo2={:?})",
                        reading.source(),
                        reading.bpm(),
                        reading.spo2()
                    ),
                );
            }
        }
        Err(e) => {
            metrics.persist_failed();
            logger::error(LogTag::Persist, &format!("Failed to save reading: {}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreResult;
    use crate::reading::StoredReading;
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use chrono::Utc;
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    /// Store that records inserts, optionally blocking until released
    struct GatedStore {
        inserted: Mutex<Vec<Reading>>,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    #[async_trait]
    impl RecordStore for GatedStore {
        async fn insert(&self, reading: &Reading) -> StoreResult<()> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(StoreError::Worker("disk on fire".to_string()));
            }
            self.inserted.lock().push(reading.clone());
            Ok(())
        }

        async fn query(&self, _limit: usize) -> StoreResult<Vec<StoredReading>> {
            Ok(Vec::new())
        }
    }

    fn reading(bpm: f64) -> Reading {
        Reading::new(Some(bpm), None, Utc::now(), "esp32")
    }

    fn config(queue_size: usize, concurrency: usize, timeout_ms: u64) -> PersistConfig {
        PersistConfig {
            queue_size,
            concurrency,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_readings_reach_store() {
        let store = Arc::new(GatedStore {
            inserted: Mutex::new(Vec::new()),
            gate: None,
            fail: false,
        });
        let metrics = HubMetrics::new();
        let queue = PersistQueue::spawn(store.clone(), config(8, 2, 1000), metrics.clone());

        assert_eq!(queue.enqueue(reading(70.0)), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(reading(71.0)), EnqueueOutcome::Queued);

        wait_for(|| store.inserted.lock().len() == 2).await;
        wait_for(|| metrics.snapshot().readings_persisted == 2).await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(GatedStore {
            inserted: Mutex::new(Vec::new()),
            gate: Some(gate.clone()),
            fail: false,
        });
        let metrics = HubMetrics::new();
        let queue = PersistQueue::spawn(store, config(1, 1, 60_000), metrics.clone());

        // The dispatcher holds at most a few readings while the gate is
        // closed; a burst larger than that must overflow.
        let outcomes: Vec<_> = (0..10).map(|i| queue.enqueue(reading(i as f64))).collect();
        assert!(outcomes.contains(&EnqueueOutcome::Dropped));
        assert!(metrics.snapshot().persist_dropped > 0);
    }

    #[tokio::test]
    async fn test_store_errors_are_counted() {
        let failing = Arc::new(GatedStore {
            inserted: Mutex::new(Vec::new()),
            gate: None,
            fail: true,
        });
        let metrics = HubMetrics::new();
        let queue = PersistQueue::spawn(failing, config(4, 1, 1000), metrics.clone());
        queue.enqueue(reading(60.0));
        wait_for(|| metrics.snapshot().persist_failures == 1).await;
        assert_eq!(metrics.snapshot().readings_persisted, 0);
    }

    #[tokio::test]
    async fn test_slow_insert_keeps_its_slot_until_done() {
        let gate = Arc::new(Notify::new());
        let stalled = Arc::new(GatedStore {
            inserted: Mutex::new(Vec::new()),
            gate: Some(gate.clone()),
            fail: false,
        });
        let metrics = HubMetrics::new();
        let queue = PersistQueue::spawn(stalled.clone(), config(4, 1, 20), metrics.clone());
        queue.enqueue(reading(61.0));
        queue.enqueue(reading(62.0));

        wait_for(|| metrics.snapshot().persist_slow == 1).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Only the first insert started; the second waits for its slot
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.persist_slow, 1);
        assert_eq!(snapshot.persist_failures, 0);

        gate.notify_one();
        wait_for(|| stalled.inserted.lock().len() == 1).await;
        gate.notify_one();
        wait_for(|| stalled.inserted.lock().len() == 2).await;

        wait_for(|| metrics.snapshot().readings_persisted == 2).await;
        assert_eq!(metrics.snapshot().persist_failures, 0);
    }

    /// Wraps the SQLite store and records the most inserts ever in flight
    struct TrackingStore {
        inner: SqliteStore,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for TrackingStore {
        async fn insert(&self, reading: &Reading) -> StoreResult<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let result = self.inner.insert(reading).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn query(&self, limit: usize) -> StoreResult<Vec<StoredReading>> {
            self.inner.query(limit).await
        }
    }

    fn file_store(dir: &tempfile::TempDir, busy: Duration) -> (SqliteStore, std::path::PathBuf) {
        let path = dir.path().join("relay.db");
        let store = SqliteStore::open(&format!("sqlite://{}", path.display()))
            .unwrap()
            .with_busy_timeout(busy)
            .unwrap();
        (store, path)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_locked_database_stays_within_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let (inner, path) = file_store(&dir, Duration::from_secs(10));
        let store = Arc::new(TrackingStore {
            inner,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let locker = rusqlite::Connection::open(&path).unwrap();
        locker.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let metrics = HubMetrics::new();
        let queue = PersistQueue::spawn(store.clone(), config(32, 1, 50), metrics.clone());
        for i in 0..20 {
            assert_eq!(queue.enqueue(reading(60.0 + i as f64)), EnqueueOutcome::Queued);
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        let locked = metrics.snapshot();
        assert_eq!(store.peak.load(Ordering::SeqCst), 1);
        assert_eq!(locked.persist_failures, 0);
        assert_eq!(locked.readings_persisted, 0);
        assert_eq!(locked.persist_slow, 1);

        locker.execute_batch("COMMIT").unwrap();

        for _ in 0..400 {
            if metrics.snapshot().readings_persisted == 20 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let done = metrics.snapshot();
        assert_eq!(done.readings_persisted, 20);
        assert_eq!(done.persist_failures, 0);
        assert_eq!(store.peak.load(Ordering::SeqCst), 1);
        assert_eq!(store.query(100).await.unwrap().len(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_busy_timeout_fails_insert_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, path) = file_store(&dir, Duration::from_millis(50));
        let store = Arc::new(store);

        let locker = rusqlite::Connection::open(&path).unwrap();
        locker.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let metrics = HubMetrics::new();
        let queue = PersistQueue::spawn(store.clone(), config(4, 1, 5_000), metrics.clone());
        queue.enqueue(reading(70.0));

        wait_for(|| metrics.snapshot().persist_failures == 1).await;
        locker.execute_batch("COMMIT").unwrap();

        assert_eq!(metrics.snapshot().readings_persisted, 0);
        assert!(store.query(10).await.unwrap().is_empty());
    }
}

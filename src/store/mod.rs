/// Durable storage for readings
///
/// The hub only depends on the `RecordStore` trait; `SqliteStore` is the
/// production backend.
use async_trait::async_trait;

use crate::errors::StoreResult;
use crate::reading::{Reading, StoredReading};

mod sqlite;

pub use sqlite::SqliteStore;

/// Append-only reading storage
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist one reading
    async fn insert(&self, reading: &Reading) -> StoreResult<()>;

    /// Up to `limit` most recent readings, newest first
    async fn query(&self, limit: usize) -> StoreResult<Vec<StoredReading>>;
}

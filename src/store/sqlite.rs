use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, Row};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{
    arguments::is_debug_store_enabled,
    errors::{StoreError, StoreResult},
    logger::{self, LogTag},
    reading::{Reading, StoredReading},
};

use super::RecordStore;

/// Where a database URL points
#[derive(Debug, Clone, PartialEq)]
enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

impl DatabaseLocation {
    fn parse(url: &str) -> StoreResult<Self> {
        let url = url.trim();
        let rest = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);

        if rest.is_empty() {
            return Err(StoreError::InvalidUrl(url.to_string()));
        }
        if rest == ":memory:" {
            return Ok(DatabaseLocation::Memory);
        }
        if rest.contains("://") {
            return Err(StoreError::InvalidUrl(format!(
                "{} (only sqlite URLs are supported)",
                url
            )));
        }
        Ok(DatabaseLocation::File(PathBuf::from(rest)))
    }
}

/// SQLite-backed reading store
///
/// One connection behind a mutex; every call runs on the blocking pool so
/// async callers never wait on disk I/O.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database, create the schema and probe it
    pub fn open(url: &str) -> StoreResult<Self> {
        let conn = match DatabaseLocation::parse(url)? {
            DatabaseLocation::Memory => Connection::open_in_memory()?,
            DatabaseLocation::File(path) => Connection::open(path)?,
        };

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        store.probe()?;

        if is_debug_store_enabled() {
            logger::debug(LogTag::Store, &format!("Opened record store at {}", url));
        }
        Ok(store)
    }

    /// Bound how long a statement waits on a database locked by another
    /// connection before failing with SQLITE_BUSY
    pub fn with_busy_timeout(self, timeout: Duration) -> StoreResult<Self> {
        {
            let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            conn.busy_timeout(timeout)?;
        }
        Ok(self)
    }

    fn create_tables(&self) -> StoreResult<()> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bpm REAL,
                spo2 REAL,
                ts INTEGER NOT NULL,
                source TEXT NOT NULL DEFAULT 'esp32',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_readings_ts ON readings(ts DESC, id DESC);
            "#,
        )?;

        Ok(())
    }

    /// Cheap round trip proving the store is usable
    fn probe(&self) -> StoreResult<()> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Run `op` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            op(&guard)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

fn row_to_stored_reading(row: &Row<'_>) -> rusqlite::Result<StoredReading> {
    let millis: i64 = row.get(3)?;
    let timestamp = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| rusqlite::Error::IntegralValueOutOfRange(3, millis))?;

    Ok(StoredReading {
        id: row.get(0)?,
        reading: Reading::new(row.get(1)?, row.get(2)?, timestamp, row.get::<_, String>(4)?),
    })
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert(&self, reading: &Reading) -> StoreResult<()> {
        let reading = reading.clone();
        let id = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO readings (bpm, spo2, ts, source) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        reading.bpm(),
                        reading.spo2(),
                        reading.timestamp().timestamp_millis(),
                        reading.source()
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        if is_debug_store_enabled() {
            logger::debug(LogTag::Store, &format!("Inserted reading #{}", id));
        }
        Ok(())
    }

    async fn query(&self, limit: usize) -> StoreResult<Vec<StoredReading>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, bpm, spo2, ts, source
                 FROM readings
                 ORDER BY ts DESC, id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], row_to_stored_reading)?;

            let mut readings = Vec::new();
            for row in rows {
                readings.push(row?);
            }
            Ok(readings)
        })
        .await
    }
}

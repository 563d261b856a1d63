/// Error types for the relay
///
/// Only startup errors are fatal. Everything that can go wrong while serving
/// (bad frames, store hiccups, dead clients) is contained where it happens
/// and reported through the logger.
use thiserror::Error;

/// Record store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")] Sqlite(#[from] rusqlite::Error),

    #[error("Database connection lock poisoned")] LockPoisoned,

    #[error("Store worker failed: {0}")] Worker(String),

    #[error("Store operation timed out after {timeout_ms}ms")] Timeout {
        timeout_ms: u64,
    },

    #[error("Invalid database URL: {0}")] InvalidUrl(String),
}

/// Process-level failures (startup, bind, serve)
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")] Configuration(String),

    #[error("Store error: {0}")] Store(#[from] StoreError),

    #[error("Failed to bind to {addr}: {reason}")] Bind {
        addr: String,
        reason: String,
    },

    #[error("Server error: {0}")] Server(String),

    #[error("IO error: {0}")] Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = StoreError::Timeout { timeout_ms: 250 };
        assert_eq!(err.to_string(), "Store operation timed out after 250ms");

        let err: RelayError = StoreError::LockPoisoned.into();
        assert!(err.to_string().contains("lock poisoned"));

        let err = RelayError::Configuration("DATABASE_URL is not set".to_string());
        assert_eq!(err.to_string(), "Configuration error: DATABASE_URL is not set");
    }
}

/// Relay configuration
///
/// Every knob has a default baked into the struct declaration; the process
/// environment (plus an optional `.env` file) overrides them. The store
/// location has no default: the relay refuses to start without one.
mod macros;

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{RelayError, RelayResult};

pub const ENV_HOST: &str = "HOST";
pub const ENV_PORT: &str = "PORT";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_MAX_FRAME_BYTES: &str = "RELAY_MAX_FRAME_BYTES";
pub const ENV_MAX_CONNECTIONS: &str = "RELAY_MAX_CONNECTIONS";
pub const ENV_CLIENT_QUEUE_SIZE: &str = "RELAY_CLIENT_QUEUE_SIZE";
pub const ENV_WRITE_TIMEOUT_MS: &str = "RELAY_WRITE_TIMEOUT_MS";
pub const ENV_PERSIST_QUEUE_SIZE: &str = "RELAY_PERSIST_QUEUE_SIZE";
pub const ENV_PERSIST_CONCURRENCY: &str = "RELAY_PERSIST_CONCURRENCY";
pub const ENV_PERSIST_TIMEOUT_MS: &str = "RELAY_PERSIST_TIMEOUT_MS";

crate::config_struct! {
    /// Runtime configuration for the relay process
    pub struct RelayConfig {
        /// Interface to bind
        host: String = "0.0.0.0".to_string(),
        /// Listening port
        port: u16 = 10000,
        /// Store location (sqlite://path, :memory:, or a bare path)
        database_url: Option<String> = None,
        /// Largest WebSocket message accepted from a client
        max_frame_bytes: usize = 64 * 1024,
        /// Upgrades beyond this many live connections get 503
        max_connections: usize = 1024,
        /// Outbound frames buffered per client
        client_queue_size: usize = 256,
        /// Bound on a single delivery (queue wait) and a single socket write
        write_timeout_ms: u64 = 5_000,
        /// Readings waiting for the store before new ones are dropped
        persist_queue_size: usize = 4_096,
        /// Concurrent store inserts
        persist_concurrency: usize = 8,
        /// Bound on a single store insert
        persist_timeout_ms: u64 = 5_000,
    }
}

impl RelayConfig {
    /// Load `.env` (if present) and read the process environment
    pub fn from_env() -> RelayResult<Self> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    ///
    /// Missing keys keep their defaults; present but unparseable or zero
    /// values are configuration errors, as is a missing `DATABASE_URL`.
    pub fn from_lookup<F>(lookup: F) -> RelayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = non_empty(lookup(ENV_HOST)) {
            config.host = host;
        }
        override_parsed(&lookup, ENV_PORT, &mut config.port)?;
        override_parsed(&lookup, ENV_MAX_FRAME_BYTES, &mut config.max_frame_bytes)?;
        override_parsed(&lookup, ENV_MAX_CONNECTIONS, &mut config.max_connections)?;
        override_parsed(&lookup, ENV_CLIENT_QUEUE_SIZE, &mut config.client_queue_size)?;
        override_parsed(&lookup, ENV_WRITE_TIMEOUT_MS, &mut config.write_timeout_ms)?;
        override_parsed(&lookup, ENV_PERSIST_QUEUE_SIZE, &mut config.persist_queue_size)?;
        override_parsed(&lookup, ENV_PERSIST_CONCURRENCY, &mut config.persist_concurrency)?;
        override_parsed(&lookup, ENV_PERSIST_TIMEOUT_MS, &mut config.persist_timeout_ms)?;

        config.database_url = non_empty(lookup(ENV_DATABASE_URL));

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the relay cannot run with
    pub fn validate(&self) -> RelayResult<()> {
        if self.database_url.is_none() {
            return Err(RelayError::Configuration(format!(
                "{} is not set; refusing to start without a record store",
                ENV_DATABASE_URL
            )));
        }

        let sizes = [
            (ENV_MAX_FRAME_BYTES, self.max_frame_bytes as u64),
            (ENV_MAX_CONNECTIONS, self.max_connections as u64),
            (ENV_CLIENT_QUEUE_SIZE, self.client_queue_size as u64),
            (ENV_WRITE_TIMEOUT_MS, self.write_timeout_ms),
            (ENV_PERSIST_QUEUE_SIZE, self.persist_queue_size as u64),
            (ENV_PERSIST_CONCURRENCY, self.persist_concurrency as u64),
            (ENV_PERSIST_TIMEOUT_MS, self.persist_timeout_ms),
        ];
        if let Some((key, _)) = sizes.iter().find(|(_, value)| *value == 0) {
            return Err(RelayError::Configuration(format!(
                "{} must be greater than zero",
                key
            )));
        }

        Ok(())
    }

    /// Socket address to listen on
    pub fn bind_addr(&self) -> RelayResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                RelayError::Configuration(format!(
                    "Invalid bind address {}:{}: {}",
                    self.host, self.port, e
                ))
            })
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> RelayResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = non_empty(lookup(key)) {
        *target = raw.parse().map_err(|e: T::Err| {
            RelayError::Configuration(format!("{}={:?} is invalid: {}", key, raw, e))
        })?;
    }
    Ok(())
}

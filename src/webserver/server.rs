/// Axum webserver implementation
///
/// Main server lifecycle management including startup, shutdown, and graceful termination
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::{
    config::RelayConfig,
    errors::{RelayError, RelayResult},
    logger::{self, LogTag},
    store::{RecordStore, SqliteStore},
    webserver::{routes, state::AppState},
};

/// Global shutdown notifier
static SHUTDOWN_NOTIFY: once_cell::sync::Lazy<Arc<Notify>> =
    once_cell::sync::Lazy::new(|| Arc::new(Notify::new()));

/// A bound listener plus the state it will serve
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<AppState>,
    addr: SocketAddr,
}

impl RelayServer {
    /// Open the record store named by the configuration, then bind
    ///
    /// Fails before any socket is opened if the configuration is invalid or
    /// the store cannot be reached.
    pub async fn bind(config: RelayConfig) -> RelayResult<Self> {
        config.validate()?;

        let url = config.database_url.clone().ok_or_else(|| {
            RelayError::Configuration("database url missing after validation".to_string())
        })?;
        let store = SqliteStore::open(&url)?.with_busy_timeout(config.persist_timeout())?;
        logger::info(LogTag::Store, "✅ Record store ready");

        Self::bind_with_store(config, Arc::new(store)).await
    }

    /// Bind with an already opened store
    pub async fn bind_with_store(
        config: RelayConfig,
        store: Arc<dyn RecordStore>,
    ) -> RelayResult<Self> {
        let addr = config.bind_addr()?;

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| bind_error(addr, e))?;
        let addr = listener.local_addr()?;

        let state = Arc::new(AppState::new(config, store));

        Ok(Self {
            listener,
            state,
            addr,
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = build_app(self.state);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| RelayError::Server(e.to_string()))
    }
}

/// Start the webserver
///
/// This function blocks until the server is shut down (ctrl-c or `shutdown()`)
pub async fn start_server(config: RelayConfig) -> RelayResult<()> {
    logger::debug(
        LogTag::Webserver,
        &format!("🌐 Starting relay on {}:{}", config.host, config.port),
    );

    let server = RelayServer::bind(config).await?;
    let addr = server.local_addr();

    logger::info(
        LogTag::Webserver,
        &format!("✅ Relay listening on http://{}", addr),
    );
    logger::debug(
        LogTag::Webserver,
        &format!("📡 WebSocket endpoint at ws://{}/ws", addr),
    );

    server.run(shutdown_signal()).await?;

    logger::info(LogTag::Webserver, "✅ Relay stopped gracefully");

    Ok(())
}

/// Trigger webserver shutdown
pub fn shutdown() {
    logger::debug(LogTag::Webserver, "Triggering webserver shutdown...");
    SHUTDOWN_NOTIFY.notify_one();
}

async fn shutdown_signal() {
    tokio::select! {
        _ = SHUTDOWN_NOTIFY.notified() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                logger::warning(
                    LogTag::Webserver,
                    &format!("Failed to listen for ctrl-c: {}", e),
                );
                SHUTDOWN_NOTIFY.notified().await;
            }
        }
    }
    logger::info(
        LogTag::Webserver,
        "Received shutdown signal, stopping relay...",
    );
}

/// Build the Axum application with all routes and middleware
pub fn build_app(state: Arc<AppState>) -> Router {
    routes::create_router(state).layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
}

fn bind_error(addr: SocketAddr, e: std::io::Error) -> RelayError {
    // Provide helpful error message for common cases
    let reason = match e.kind() {
        std::io::ErrorKind::AddrInUse => format!(
            "Address already in use\n\
             \n\
             Another relay (or another service) is already listening on port {}.\n\
             Stop it or set PORT to a free port.",
            addr.port()
        ),
        std::io::ErrorKind::PermissionDenied => format!(
            "Permission denied\n\
             \n\
             Port {} requires elevated privileges on this system.\n\
             Consider using a port above 1024 or running with appropriate permissions.",
            addr.port()
        ),
        _ => e.to_string(),
    };

    RelayError::Bind {
        addr: addr.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_missing_database_url_fails_before_binding() {
        let config = RelayConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..RelayConfig::default()
        };

        let result = start_server(config).await;
        assert!(matches!(result, Err(RelayError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unsupported_store_scheme_fails_before_binding() {
        let config = RelayConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: Some("mongodb://localhost:27017/vitals".to_string()),
            ..RelayConfig::default()
        };

        let result = RelayServer::bind(config).await;
        assert!(matches!(result, Err(RelayError::Store(_))));
    }

    #[tokio::test]
    async fn test_port_in_use_is_bind_error() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        let config = RelayConfig {
            host: "127.0.0.1".to_string(),
            port,
            database_url: Some(":memory:".to_string()),
            ..RelayConfig::default()
        };

        let result = RelayServer::bind(config).await;
        assert!(matches!(result, Err(RelayError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_cors_is_permissive() {
        let store = Arc::new(SqliteStore::open(":memory:").unwrap());
        let config = RelayConfig {
            database_url: Some(":memory:".to_string()),
            ..RelayConfig::default()
        };
        let app = build_app(Arc::new(AppState::new(config, store)));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/history")
                    .header(header::ORIGIN, "http://dashboard.local")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn test_start_server_stops_on_shutdown() {
        let config = RelayConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: Some(":memory:".to_string()),
            ..RelayConfig::default()
        };

        let handle = tokio::spawn(start_server(config));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        shutdown();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let store = Arc::new(SqliteStore::open(":memory:").unwrap());
        let config = RelayConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: Some(":memory:".to_string()),
            ..RelayConfig::default()
        };
        let server = RelayServer::bind_with_store(config, store).await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}

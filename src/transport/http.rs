//! Minimal HTTP host for the extension.
//!
//! Mounts the extension routes on an empty router, optionally puts the
//! bearer-token check in front of them and serves until SIGINT or SIGTERM.
//! The extension's `exit` hook runs after the server stops.

use crate::auth::{AuthConfig, require_bearer};
use crate::error::{ExtensionError, ExtensionResult};
use crate::extension::Extension;
use crate::transport::Transport;
use axum::{Router, middleware};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// How long in-flight requests may run after a shutdown signal.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpTransport {
    extension: Extension,
    auth: Arc<AuthConfig>,
    host: String,
    port: u16,
}

impl HttpTransport {
    pub fn new(extension: Extension, auth: AuthConfig, host: impl Into<String>, port: u16) -> Self {
        Self {
            extension,
            auth: Arc::new(auth),
            host: host.into(),
            port,
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The full host router: extension routes, optional auth, request tracing.
    pub fn app(&self) -> Router {
        let mut router = self.extension.init(Router::new());
        if self.auth.is_enabled() {
            info!(tokens = self.auth.token_count(), "Bearer authentication enabled");
            router = router.layer(middleware::from_fn_with_state(
                self.auth.clone(),
                require_bearer,
            ));
        } else {
            warn!("Bearer authentication disabled");
        }
        router.layer(TraceLayer::new_for_http())
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> ExtensionResult<()> {
        let bind_addr = self.bind_addr();
        let app = self.app();

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ExtensionError::configuration(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        info!(
            address = %bind_addr,
            extension = self.extension.metadata().id,
            "Listening"
        );

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_trigger = shutdown_notify.clone();
        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_trigger.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        // Either the server drains on its own, or the timeout (or a second
        // signal) cuts in-flight requests short.
        let served = tokio::select! {
            result = server => result.map_err(|e| {
                error!(error = %e, "HTTP server error");
                ExtensionError::internal(format!("HTTP server error: {}", e))
            }),
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for in-flight requests (send signal again to force exit)"
                );
                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => Ok(()),
        };

        self.extension.exit().await;
        info!("HTTP server stopped");
        served
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

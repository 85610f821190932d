//! Network module with deferred startup lifecycle.
//!
//! `new()` creates resources, `start()` binds the TCP listener, and
//! `serve()` accepts connections. Services can still be registered on the
//! domain between `start()` and `serve()`.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{health_handler, liveness_handler, readiness_handler, remote_handler, AppState};
use super::middleware::build_http_layers;
use super::lifecycle::NodeLifecycle;
use crate::bus::ServiceDomain;

/// Maximum time in-flight exchanges get to finish after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Serves the remote endpoint and probes for one service domain.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    domain: Arc<ServiceDomain>,
    lifecycle: Arc<NodeLifecycle>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, domain: Arc<ServiceDomain>) -> Self {
        Self {
            config,
            listener: None,
            domain,
            lifecycle: Arc::new(NodeLifecycle::new()),
        }
    }

    /// Shared handle to the node lifecycle.
    #[must_use]
    pub fn lifecycle(&self) -> Arc<NodeLifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Assembles the router.
    ///
    /// Routes:
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- liveness probe
    /// - `GET /health/ready` -- readiness probe
    /// - `POST {remote_path}` -- remote wire messages
    pub fn build_router(&self) -> Router {
        let state = AppState {
            domain: Arc::clone(&self.domain),
            lifecycle: Arc::clone(&self.lifecycle),
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route(&self.config.remote_path, post(remote_handler))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the TCP listener and returns the bound port, which differs from
    /// the configured one when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains.
    ///
    /// When the signal fires the node turns `Draining` so new remote
    /// exchanges get 503, the server stops accepting connections, and
    /// in-flight exchanges get up to 30 seconds to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server hits
    /// a fatal I/O error.
    pub async fn serve(mut self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();

        self.lifecycle.set_ready();
        info!(domain = self.domain.name(), path = %self.config.remote_path, "serving remote endpoint");

        let lifecycle = Arc::clone(&self.lifecycle);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                lifecycle.begin_drain();
            })
            .await?;

        if self.lifecycle.wait_for_drain(DRAIN_TIMEOUT).await {
            info!("all in-flight exchanges drained");
        } else {
            warn!("drain timeout expired with in-flight exchanges remaining");
        }
        Ok(())
    }
}

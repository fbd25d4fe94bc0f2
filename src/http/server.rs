//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the admission gate in front of the proxy
//! - Bound upstream call time without counting queue time
//! - Apply reloadable config (queue deadline, overload response) at runtime
//! - Serve with graceful shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::any, Router};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admission::{AdmissionController, MaxConnectionsLayer};
use crate::config::validation::ValidationError;
use crate::config::GateConfig;
use crate::http::proxy::{proxy_handler, UpstreamState};
use crate::lifecycle::shutdown;

/// Error type for server construction and serving.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("invalid upstream address: {0}")]
    Upstream(#[from] axum::http::uri::InvalidUri),

    #[error("server IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP server for the admission gate.
pub struct HttpServer {
    router: Router,
    config: GateConfig,
    controller: Arc<AdmissionController>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GateConfig) -> Result<Self, ServerError> {
        let controller = Arc::new(AdmissionController::from_config(&config.admission)?);
        let upstream = UpstreamState::new(&config.upstream.address)?;
        let router = Self::build_router(&config, upstream, controller.clone());

        Ok(Self {
            router,
            config,
            controller,
        })
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Layers run outside-in: trace → admission gate → upstream timeout →
    /// proxy handler.
    #[allow(deprecated)]
    fn build_router(
        config: &GateConfig,
        upstream: UpstreamState,
        controller: Arc<AdmissionController>,
    ) -> Router {
        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(upstream)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.upstream.request_timeout_secs,
            )))
            .layer(MaxConnectionsLayer::from_controller(controller))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Configs received on `config_updates` are applied as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GateConfig>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            max_running = self.config.admission.max_running,
            max_in_queue = self.config.admission.max_in_queue,
            max_wait_in_queue_ms = self.config.admission.max_wait_in_queue_ms,
            upstream = %self.config.upstream.address,
            "HTTP server starting"
        );

        let controller = self.controller.clone();
        let mut current = self.config.clone();
        let reloader = tokio::spawn(async move {
            while let Some(new_config) = config_updates.recv().await {
                apply_reload(&controller, &current, &new_config);
                current = new_config;
            }
        });

        let served = axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown::recv(shutdown))
            .await;
        reloader.abort();
        served?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<AdmissionController> {
        &self.controller
    }
}

/// Apply the reloadable part of `new` and warn about changes that only take
/// effect after a restart.
pub fn apply_reload(controller: &AdmissionController, current: &GateConfig, new: &GateConfig) {
    controller.apply_config(&new.admission);
    tracing::info!(
        max_wait_in_queue_ms = new.admission.max_wait_in_queue_ms,
        overload_status = new.admission.overload.status,
        "Admission settings reloaded"
    );

    let restart_only = [
        (
            "admission.max_running",
            current.admission.max_running != new.admission.max_running,
        ),
        (
            "admission.max_in_queue",
            current.admission.max_in_queue != new.admission.max_in_queue,
        ),
        ("listener", current.listener != new.listener),
        ("upstream", current.upstream != new.upstream),
        ("admin", current.admin != new.admin),
        ("observability", current.observability != new.observability),
    ];
    for (field, changed) in restart_only {
        if changed {
            tracing::warn!(field, "Config change requires a restart, ignoring");
        }
    }
}

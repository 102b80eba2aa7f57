//! Host lifecycle: `provision` once, then `serve_http` per request.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;

use httpprom_core::error::Result;
use httpprom_core::Registry;

use crate::config::ExporterConfig;
use crate::http::{Handler, HandlerError, MiddlewareHandler, Request, ResponseWriter};
use crate::instrument::{HttpMetrics, Instrumented};
use crate::server::{exposition_router, ExpositionServer, ServerHandle, ServerState};

/// Provisioned metrics module: registry, request metric set, and (unless the
/// host serves the route itself) a running exposition server.
pub struct Metrics {
    cfg: ExporterConfig,
    registry: Arc<Registry>,
    http: Arc<HttpMetrics>,
    server: Option<ServerHandle>,
}

impl Metrics {
    /// Build a fresh registry and start exporting.
    pub async fn provision(cfg: ExporterConfig) -> Result<Self> {
        Self::provision_with_registry(cfg, Arc::new(Registry::new())).await
    }

    /// Same as [`Metrics::provision`], recording into `registry`.
    ///
    /// Fails on conflicting metric registration or when the listener cannot
    /// be bound; nothing is left running in either case.
    pub async fn provision_with_registry(cfg: ExporterConfig, registry: Arc<Registry>) -> Result<Self> {
        let http = Arc::new(HttpMetrics::register(&registry, &cfg)?);

        let server = if cfg.use_host_address {
            tracing::info!(path = %cfg.path, "metrics served on the host listener");
            None
        } else {
            let mut server = ExpositionServer::new(&cfg, Arc::clone(&registry));
            server.bind().await?;
            Some(server.serve()?)
        };

        Ok(Self { cfg, registry, http, server })
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.cfg
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn http_metrics(&self) -> Arc<HttpMetrics> {
        Arc::clone(&self.http)
    }

    /// Address of the dedicated listener, if one was started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(ServerHandle::local_addr)
    }

    pub fn server_state(&self) -> Option<ServerState> {
        self.server.as_ref().map(ServerHandle::state)
    }

    /// Exposition route for mounting on the host's own router.
    pub fn exposition_router(&self) -> Router {
        exposition_router(&self.cfg.path, Arc::clone(&self.registry))
    }

    pub fn wrap<H: Handler>(&self, next: H) -> Instrumented<H> {
        self.http.wrap(next)
    }

    /// Instrument an axum router.
    pub fn layer_router<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        self.http.layer_router(router)
    }

    /// Gracefully stop the exposition server. `None` in host-address mode.
    pub async fn shutdown(mut self) -> Option<ServerState> {
        match self.server.take() {
            Some(server) => Some(server.shutdown().await),
            None => None,
        }
    }
}

#[async_trait]
impl MiddlewareHandler for Metrics {
    async fn serve_http(
        &self,
        req: &Request,
        w: &mut dyn ResponseWriter,
        next: &dyn Handler,
    ) -> std::result::Result<(), HandlerError> {
        self.http.instrument(req, w, next).await
    }
}

//! Exposition server.
//!
//! A dedicated listener serving one route with the registry snapshot.
//!
//! - `GET <path>` : Prometheus text format
//! - anything else : 404
//!
//! Lifecycle: `Unbound -> Listening -> Serving -> Closed`. Bind failures are
//! fatal and returned to the caller; teardown errors are only logged.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use httpprom_core::error::{MetricsError, Result};
use httpprom_core::{text, Registry};

use crate::config::ExporterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unbound,
    Listening,
    Serving,
    Closed,
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(s: ServerState) -> Self {
        Self(AtomicU8::new(s as u8))
    }

    fn set(&self, s: ServerState) {
        self.0.store(s as u8, Ordering::Release);
    }

    fn get(&self) -> ServerState {
        match self.0.load(Ordering::Acquire) {
            0 => ServerState::Unbound,
            1 => ServerState::Listening,
            2 => ServerState::Serving,
            _ => ServerState::Closed,
        }
    }
}

/// Router serving the exposition route. Hosts sharing their own listener
/// mount this directly.
pub fn exposition_router(path: &str, registry: Arc<Registry>) -> Router {
    Router::new()
        .route(path, get(scrape))
        .fallback(not_found)
        .with_state(registry)
}

async fn scrape(State(registry): State<Arc<Registry>>) -> Response {
    render_response(|| registry.snapshot().encode_text())
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "404 page not found\n")
}

/// Run the renderer, turning a panic into a 500 with the panic text.
fn render_response(render: impl FnOnce() -> String) -> Response {
    match catch_unwind(AssertUnwindSafe(render)) {
        Ok(body) => (StatusCode::OK, [(CONTENT_TYPE, text::CONTENT_TYPE)], body).into_response(),
        Err(panic) => {
            let msg = panic_message(panic.as_ref());
            tracing::error!(error = %msg, "error gathering metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("An error has occurred while gathering metrics:\n\n{msg}\n"),
            )
                .into_response()
        }
    }
}

fn panic_message(p: &(dyn Any + Send)) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = p.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Exposition listener before it starts serving.
pub struct ExpositionServer {
    address: String,
    path: String,
    registry: Arc<Registry>,
    listener: Option<TcpListener>,
    state: Arc<StateCell>,
}

impl ExpositionServer {
    pub fn new(cfg: &ExporterConfig, registry: Arc<Registry>) -> Self {
        Self {
            address: cfg.address.clone(),
            path: cfg.path.clone(),
            registry,
            listener: None,
            state: Arc::new(StateCell::new(ServerState::Unbound)),
        }
    }

    pub fn state(&self) -> ServerState {
        self.state.get()
    }

    /// Bind the listener (`Unbound -> Listening`).
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if let Some(l) = &self.listener {
            return l.local_addr().map_err(|e| MetricsError::Internal(e.to_string()));
        }

        let bind_err = |source: std::io::Error| MetricsError::Bind { addr: self.address.clone(), source };
        let listener = TcpListener::bind(self.address.as_str()).await.map_err(bind_err)?;
        let local = listener.local_addr().map_err(bind_err)?;

        tracing::info!(%local, path = %self.path, "binding prometheus exporter");
        self.listener = Some(listener);
        self.state.set(ServerState::Listening);
        Ok(local)
    }

    /// Start the serve loop on the runtime (`Listening -> Serving`).
    pub fn serve(self) -> Result<ServerHandle> {
        let listener = self
            .listener
            .ok_or_else(|| MetricsError::Internal("exposition server not bound".into()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| MetricsError::Internal(e.to_string()))?;

        let app = exposition_router(&self.path, self.registry);
        let (tx, rx) = oneshot::channel::<()>();
        let state = Arc::clone(&self.state);
        state.set(ServerState::Serving);

        let task = tokio::spawn(async move {
            let res = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await;
            if let Err(e) = res {
                tracing::error!(error = %e, "metrics handler's server failed to serve");
            }
            state.set(ServerState::Closed);
            tracing::info!(%local_addr, "prometheus exporter stopped");
        });

        Ok(ServerHandle {
            local_addr,
            shutdown: Some(tx),
            task: Some(task),
            state: self.state,
        })
    }
}

/// Running exposition server. Dropping it starts a graceful shutdown.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    state: Arc<StateCell>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        self.state.get()
    }

    /// Stop accepting, let in-flight scrapes finish, then close.
    ///
    /// Returns the state the server ended in; `Closed` once drained.
    pub async fn shutdown(mut self) -> ServerState {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "metrics server task ended abnormally");
                self.state.set(ServerState::Closed);
            }
        }
        self.state.get()
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

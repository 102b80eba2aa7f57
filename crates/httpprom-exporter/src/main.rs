//! httpprom demo host.
//!
//! - Upstream app on `listen`, every route instrumented
//! - Metrics on the exporter listener (default `localhost:9180/metrics`), or
//!   on `listen` itself with `metrics.use_host_address: true`
//! - Ctrl-C drains both listeners
//!
//! Usage: `httpprom-exporter [config.yaml|config.json]`

use std::net::SocketAddr;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tracing_subscriber::{fmt, EnvFilter};

use httpprom_exporter::config::{self, ServiceConfig};
use httpprom_exporter::Metrics;

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cfg: ServiceConfig = match std::env::args().nth(1) {
        Some(path) => config::load_from_file(&path).expect("config load failed"),
        None => ServiceConfig::default(),
    };
    let listen: SocketAddr = cfg
        .listen
        .parse()
        .expect("listen must be a valid SocketAddr");
    let exporter = cfg.metrics.finalize().expect("invalid metrics config");

    // Bind failure is fatal.
    let metrics = Metrics::provision(exporter).await.expect("metrics provision failed");

    let mut app = metrics.layer_router(demo_router());
    if metrics.config().use_host_address {
        app = app.merge(metrics.exposition_router());
    }

    tracing::info!(%listen, metrics = ?metrics.local_addr(), "httpprom demo starting");
    let listener = tokio::net::TcpListener::bind(listen).await.expect("failed to bind");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");

    if let Some(state) = metrics.shutdown().await {
        tracing::info!(?state, "metrics server stopped");
    }
}

fn demo_router() -> Router {
    Router::new()
        .route("/", get(|| async { "hello\n" }))
        .route("/teapot", get(|| async { (StatusCode::IM_A_TEAPOT, "short and stout\n") }))
        .route("/users/:id", get(|Path(id): Path<String>| async move { format!("user {id}\n") }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

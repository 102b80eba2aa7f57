#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, StatusCode};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures_util::stream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use httpprom_core::labels::http_labels;
use httpprom_core::Registry;
use httpprom_exporter::config::{ExporterConfig, RawConfig};
use httpprom_exporter::http::{BufferedResponse, Handler, HandlerError, Request, ResponseWriter};
use httpprom_exporter::server::{ExpositionServer, ServerState};
use httpprom_exporter::Metrics;

use common::{eventually, get as http_get, sample, send};

fn local_config() -> ExporterConfig {
    RawConfig {
        address: Some("127.0.0.1:0".into()),
        ..Default::default()
    }
    .finalize()
    .unwrap()
}

struct Slow;

#[async_trait]
impl Handler for Slow {
    async fn serve_http(&self, _req: &Request, w: &mut dyn ResponseWriter) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        w.write_all(b"done").map_err(HandlerError::new)
    }
}

#[tokio::test]
async fn scrape_returns_text_format() {
    let metrics = Metrics::provision(local_config()).await.unwrap();
    let addr = metrics.local_addr().expect("dedicated listener");
    assert_eq!(metrics.server_state(), Some(ServerState::Serving));

    let req = axum::http::Request::builder()
        .method(Method::GET)
        .uri("/")
        .body(Bytes::new())
        .unwrap();
    metrics
        .wrap(Slow)
        .serve_http(&req, &mut BufferedResponse::new())
        .await
        .unwrap();

    let reply = http_get(addr, "/metrics").await;
    assert_eq!(reply.status, 200);
    assert_eq!(
        reply.header("content-type"),
        Some("text/plain; version=0.0.4; charset=utf-8")
    );
    let body = &reply.body;
    assert!(body.contains("# HELP http_request_count_total Counter of HTTP(S) requests made.\n"));
    assert!(body.contains("# TYPE http_request_duration_seconds histogram\n"));
    assert_eq!(sample(body, "http_request_count_total{code=\"200\",method=\"GET\"}"), Some(1.0));
    assert_eq!(
        sample(body, "http_request_duration_seconds_bucket{code=\"200\",method=\"GET\",le=\"+Inf\"}"),
        sample(body, "http_request_duration_seconds_count{code=\"200\",method=\"GET\"}"),
    );
    assert_eq!(sample(body, "http_response_size_bytes_sum{code=\"200\",method=\"GET\"}"), Some(4.0));

    metrics.shutdown().await;
}

#[tokio::test]
async fn other_paths_are_404() {
    let metrics = Metrics::provision(local_config()).await.unwrap();
    let addr = metrics.local_addr().unwrap();

    assert_eq!(http_get(addr, "/").await.status, 404);
    assert_eq!(http_get(addr, "/metricsx").await.status, 404);

    metrics.shutdown().await;
}

#[tokio::test]
async fn custom_path_is_served() {
    let cfg = RawConfig {
        address: Some("127.0.0.1:0".into()),
        path: Some("/otherpath".into()),
        ..Default::default()
    }
    .finalize()
    .unwrap();
    let metrics = Metrics::provision(cfg).await.unwrap();
    let addr = metrics.local_addr().unwrap();

    assert_eq!(http_get(addr, "/otherpath").await.status, 200);
    assert_eq!(http_get(addr, "/metrics").await.status, 404);

    metrics.shutdown().await;
}

#[tokio::test]
async fn bind_failure_is_fatal() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cfg = RawConfig {
        address: Some(taken.local_addr().unwrap().to_string()),
        ..Default::default()
    }
    .finalize()
    .unwrap();

    let err = Metrics::provision(cfg).await.err().expect("address in use");
    assert_eq!(err.class().as_str(), "BIND");
}

#[tokio::test]
async fn server_walks_through_its_states() {
    let mut server = ExpositionServer::new(&local_config(), Arc::new(Registry::new()));
    assert_eq!(server.state(), ServerState::Unbound);

    let addr = server.bind().await.unwrap();
    assert_eq!(server.state(), ServerState::Listening);

    let handle = server.serve().unwrap();
    assert_eq!(handle.local_addr(), addr);
    assert_eq!(handle.state(), ServerState::Serving);
    assert_eq!(http_get(addr, "/metrics").await.status, 200);

    assert_eq!(handle.shutdown().await, ServerState::Closed);
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn shutdown_lets_in_flight_scrape_finish() {
    let mut server = ExpositionServer::new(&local_config(), Arc::new(Registry::new()));
    let addr = server.bind().await.unwrap();
    let handle = server.serve().unwrap();

    // Head started but not finished when shutdown begins.
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\n")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopping = tokio::spawn(handle.shutdown());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stopping.is_finished(), "server waits for the open scrape");

    stream.write_all(b"\r\n").await.unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let reply = String::from_utf8_lossy(&raw);
    assert!(reply.starts_with("HTTP/1.1 200"), "got: {reply}");

    let state = tokio::time::timeout(Duration::from_secs(2), stopping)
        .await
        .expect("drained")
        .unwrap();
    assert_eq!(state, ServerState::Closed);
}

#[tokio::test]
async fn serve_without_bind_is_an_error() {
    let server = ExpositionServer::new(&local_config(), Arc::new(Registry::new()));
    assert!(server.serve().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scrape_during_heavy_traffic() {
    let metrics = Metrics::provision(local_config()).await.unwrap();
    let addr = metrics.local_addr().unwrap();
    let handler = Arc::new(metrics.wrap(Slow));

    let in_flight: Vec<_> = (0..1000)
        .map(|_| {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let req = axum::http::Request::builder()
                    .method(Method::GET)
                    .uri("/")
                    .body(Bytes::new())
                    .unwrap();
                handler.serve_http(&req, &mut BufferedResponse::new()).await.unwrap();
            })
        })
        .collect();

    // Requests are parked in their sleep; the scrape must not wait for them.
    let reply = tokio::time::timeout(Duration::from_secs(2), http_get(addr, "/metrics"))
        .await
        .expect("scrape is not blocked by traffic");
    assert_eq!(reply.status, 200);
    assert!(reply.body.contains("# TYPE http_request_count_total counter\n"));
    for line in reply.body.lines().filter(|l| !l.starts_with('#')) {
        let (_, value) = line.rsplit_once(' ').expect("series line has a value");
        assert!(value.parse::<f64>().is_ok(), "bad sample line: {line}");
    }

    for t in in_flight {
        t.await.unwrap();
    }

    let labels = http_labels("GET", 200, None);
    let http = metrics.http_metrics();
    assert_eq!(http.request_count().get(&labels).unwrap(), 1000);
    assert_eq!(http.request_duration().get(&labels).unwrap().count, 1000);

    let reply = http_get(addr, "/metrics").await;
    assert_eq!(sample(&reply.body, "http_request_count_total{code=\"200\",method=\"GET\"}"), Some(1000.0));

    metrics.shutdown().await;
}

#[tokio::test]
async fn axum_router_is_instrumented() {
    let cfg = RawConfig {
        address: Some("127.0.0.1:0".into()),
        path_label: true,
        ..Default::default()
    }
    .finalize()
    .unwrap();
    let metrics = Metrics::provision(cfg).await.unwrap();
    let metrics_addr = metrics.local_addr().unwrap();

    let app = metrics.layer_router(
        Router::new()
            .route("/", get(|| async { "hello" }))
            .route("/users/:id", get(|| async { (StatusCode::IM_A_TEAPOT, "teapot") }))
            .route("/upload", axum::routing::post(|body: Bytes| async move { body.len().to_string() })),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let app_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    assert_eq!(http_get(app_addr, "/").await.body, "hello");
    assert_eq!(http_get(app_addr, "/users/7").await.status, 418);
    assert_eq!(send(app_addr, "POST", "/upload", "0123456789").await.body, "10");

    let http = metrics.http_metrics();
    let root = http_labels("GET", 200, Some("/"));
    let user = http_labels("GET", 418, Some("/users/:id"));
    let upload = http_labels("POST", 200, Some("/upload"));
    // request_size is the last series written per observation.
    for labels in [&root, &user, &upload] {
        assert!(eventually(|| http.request_size().get(labels).unwrap().count == 1).await);
        assert_eq!(http.request_count().get(labels).unwrap(), 1);
    }
    assert_eq!(http.response_size().get(&root).unwrap().sum, 5.0);
    assert_eq!(http.response_size().get(&user).unwrap().sum, 6.0);
    assert_eq!(http.request_size().get(&upload).unwrap().sum, 10.0);

    let reply = http_get(metrics_addr, "/metrics").await;
    assert_eq!(
        sample(&reply.body, "http_request_count_total{code=\"418\",method=\"GET\",path=\"/users/:id\"}"),
        Some(1.0)
    );

    metrics.shutdown().await;
}

#[tokio::test]
async fn host_address_mode_mounts_on_host_router() {
    let cfg = RawConfig { use_host_address: true, ..Default::default() }
        .finalize()
        .unwrap();
    let metrics = Metrics::provision(cfg).await.unwrap();
    assert!(metrics.local_addr().is_none());
    assert!(metrics.server_state().is_none());

    let app = metrics
        .layer_router(Router::new().route("/", get(|| async { "hi" })))
        .merge(metrics.exposition_router());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    assert_eq!(http_get(addr, "/").await.status, 200);
    let http = metrics.http_metrics();
    let labels = http_labels("GET", 200, None);
    assert!(eventually(|| http.request_size().get(&labels).unwrap().count == 1).await);

    let reply = http_get(addr, "/metrics").await;
    assert_eq!(reply.status, 200);
    assert_eq!(sample(&reply.body, "http_request_count_total{code=\"200\",method=\"GET\"}"), Some(1.0));
    assert_eq!(metrics.shutdown().await, None);
}

async fn spawn_app(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn layer_keeps_response_framing() {
    let cfg = RawConfig { use_host_address: true, ..Default::default() }
        .finalize()
        .unwrap();
    let metrics = Metrics::provision(cfg).await.unwrap();
    let routes = || Router::new().route("/", get(|| async { "hello" }));

    let bare = http_get(spawn_app(routes()).await, "/").await;
    let layered = http_get(spawn_app(metrics.layer_router(routes())).await, "/").await;

    assert_eq!(bare.header("content-length"), Some("5"));
    assert_eq!(layered.header("content-length"), bare.header("content-length"));
    assert_eq!(layered.header("transfer-encoding"), None);
    assert_eq!(layered.body, "hello");
}

#[tokio::test]
async fn client_abort_mid_body_is_recorded() {
    const CHUNK: usize = 64 * 1024;
    const CHUNKS: usize = 200;

    let cfg = RawConfig { use_host_address: true, ..Default::default() }
        .finalize()
        .unwrap();
    let metrics = Metrics::provision(cfg).await.unwrap();
    let app = metrics.layer_router(Router::new().route(
        "/download",
        get(|| async {
            let chunks = stream::unfold(0usize, |i| async move {
                if i == CHUNKS {
                    return None;
                }
                if i > 0 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Some((Ok::<_, std::io::Error>(Bytes::from(vec![b'x'; CHUNK])), i + 1))
            });
            Body::from_stream(chunks)
        }),
    ));
    let addr = spawn_app(app).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /download HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut received = 0usize;
    let mut buf = vec![0u8; 16 * 1024];
    while received < CHUNK {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "server closed early");
        received += n;
    }
    drop(stream);

    let http = metrics.http_metrics();
    let labels = http_labels("GET", 200, None);
    assert!(eventually(|| http.request_size().get(&labels).unwrap().count == 1).await);
    assert_eq!(http.request_count().get(&labels).unwrap(), 1);

    let sent = http.response_size().get(&labels).unwrap().sum;
    assert!(sent >= CHUNK as f64, "at least the first chunk went out: {sent}");
    assert!(sent < (CHUNK * CHUNKS) as f64, "body was cut short: {sent}");
    assert_eq!(sent as usize % CHUNK, 0, "whole chunks are counted: {sent}");
}

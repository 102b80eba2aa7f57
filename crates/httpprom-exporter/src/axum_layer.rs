//! axum integration.
//!
//! For hosts that are plain axum routers rather than a handler chain. The
//! response body is wrapped in a counting body and the observation is
//! recorded once that body is finished or dropped, so aborted downloads
//! still show up with the bytes actually sent. Size hints and trailers pass
//! through untouched, so the response keeps its `Content-Length` framing.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};

use httpprom_core::labels::normalize_path;

use crate::instrument::{HttpMetrics, Observation};

impl HttpMetrics {
    /// Instrument every route of `router`.
    pub fn layer_router<S>(self: &Arc<Self>, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(Arc::clone(self), track))
    }
}

/// Middleware entry; see [`HttpMetrics::layer_router`].
pub async fn track(State(metrics): State<Arc<HttpMetrics>>, req: Request, next: Next) -> Response {
    let method = req.method().as_str().to_string();
    let path = metrics.path_label().then(|| match req.extensions().get::<MatchedPath>() {
        Some(route) => route.as_str().to_string(),
        None => normalize_path(req.uri().path()),
    });
    let request_bytes = request_size(&req);
    let start = Instant::now();

    let response = next.run(req).await;
    let (parts, body) = response.into_parts();

    let pending = PendingObservation {
        metrics,
        method,
        path,
        status: parts.status.as_u16(),
        start,
        request_bytes,
        response_bytes: 0,
    };
    Response::from_parts(parts, Body::new(CountingBody { inner: body, pending }))
}

/// Exact body length when known, else `Content-Length`, else 0.
fn request_size(req: &Request) -> u64 {
    req.body().size_hint().exact().unwrap_or_else(|| {
        req.headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
    })
}

/// Response body that counts data frames on their way out.
struct CountingBody {
    inner: Body,
    pending: PendingObservation,
}

impl HttpBody for CountingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if let Poll::Ready(Some(Ok(frame))) = &polled {
            if let Some(data) = frame.data_ref() {
                this.pending.add(data.len());
            }
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Recorded on drop: when the body ends or the client goes away.
struct PendingObservation {
    metrics: Arc<HttpMetrics>,
    method: String,
    path: Option<String>,
    status: u16,
    start: Instant,
    request_bytes: u64,
    response_bytes: u64,
}

impl PendingObservation {
    fn add(&mut self, n: usize) {
        self.response_bytes += n as u64;
    }
}

impl Drop for PendingObservation {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        self.metrics.record(&Observation {
            method: &self.method,
            status: self.status,
            path: self.path.as_deref(),
            duration: self.start.elapsed(),
            request_bytes: self.request_bytes,
            response_bytes: self.response_bytes,
        });
    }
}

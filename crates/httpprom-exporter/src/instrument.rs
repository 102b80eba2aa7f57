//! Request instrumentation.
//!
//! Observes one HTTP transaction per invocation: duration of the wrapped call,
//! bytes written to the response, bytes of the request body, and the final
//! status. The original handler result is always returned untouched.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};

use httpprom_core::error::Result;
use httpprom_core::labels::{http_label_names, http_labels, normalize_path};
use httpprom_core::{CounterVec, HistogramVec, Registry};

use crate::config::ExporterConfig;
use crate::http::{Handler, HandlerError, Request, ResponseWriter};

/// One completed (or abandoned) request, ready to be recorded.
#[derive(Debug, Clone)]
pub struct Observation<'a> {
    pub method: &'a str,
    pub status: u16,
    pub path: Option<&'a str>,
    pub duration: Duration,
    pub request_bytes: u64,
    pub response_bytes: u64,
}

/// The request metric set.
pub struct HttpMetrics {
    request_count: CounterVec,
    request_duration: HistogramVec,
    response_size: HistogramVec,
    request_size: HistogramVec,
    response_status: CounterVec,
    path_label: bool,
}

impl HttpMetrics {
    /// Register the metric set. Registering again with the same config hands
    /// back the existing series.
    pub fn register(registry: &Registry, cfg: &ExporterConfig) -> Result<Self> {
        let labels = http_label_names(cfg.path_label);

        Ok(Self {
            request_count: registry.register_counter(
                cfg.metric_name("request_count_total"),
                "Counter of HTTP(S) requests made.",
                &labels,
            )?,
            request_duration: registry.register_histogram(
                cfg.metric_name("request_duration_seconds"),
                "Histogram of the time (in seconds) each request took.",
                &labels,
                cfg.latency_buckets.clone(),
            )?,
            response_size: registry.register_histogram(
                cfg.metric_name("response_size_bytes"),
                "Size of the returned response in bytes.",
                &labels,
                cfg.size_buckets.clone(),
            )?,
            request_size: registry.register_histogram(
                cfg.metric_name("request_size_bytes"),
                "Size of the request body in bytes.",
                &labels,
                cfg.size_buckets.clone(),
            )?,
            response_status: registry.register_counter(
                cfg.metric_name("response_status_count_total"),
                "Counter of response status codes.",
                &labels,
            )?,
            path_label: cfg.path_label,
        })
    }

    pub fn path_label(&self) -> bool {
        self.path_label
    }

    pub fn request_count(&self) -> &CounterVec {
        &self.request_count
    }

    pub fn request_duration(&self) -> &HistogramVec {
        &self.request_duration
    }

    pub fn response_size(&self) -> &HistogramVec {
        &self.response_size
    }

    pub fn request_size(&self) -> &HistogramVec {
        &self.request_size
    }

    pub fn response_status(&self) -> &CounterVec {
        &self.response_status
    }

    /// Record one observation. Rejected updates are logged and dropped.
    pub fn record(&self, obs: &Observation<'_>) {
        let path = if self.path_label { Some(obs.path.unwrap_or("/")) } else { None };
        let labels = http_labels(obs.method, obs.status, path);

        report(self.request_count.inc(&labels));
        report(self.response_status.inc(&labels));
        report(self.request_duration.observe(&labels, obs.duration.as_secs_f64()));
        report(self.response_size.observe(&labels, obs.response_bytes as f64));
        report(self.request_size.observe(&labels, obs.request_bytes as f64));
    }

    /// Wrap `next` so it can be used anywhere a [`Handler`] is expected.
    pub fn wrap<H: Handler>(self: &Arc<Self>, next: H) -> Instrumented<H> {
        Instrumented { metrics: Arc::clone(self), next }
    }

    /// Run `next` and record the transaction.
    pub async fn instrument(
        &self,
        req: &Request,
        w: &mut dyn ResponseWriter,
        next: &dyn Handler,
    ) -> std::result::Result<(), HandlerError> {
        let path = self.path_label.then(|| normalize_path(req.uri().path()));
        let mut rec = RecordingWriter {
            inner: w,
            metrics: self,
            method: req.method().as_str(),
            path,
            request_bytes: req.body().len() as u64,
            start: Instant::now(),
            status: None,
            written: 0,
            done: false,
        };

        let result = next.serve_http(req, &mut rec).await;

        let fallback = result.as_ref().err().and_then(HandlerError::status);
        rec.finish(fallback);
        result
    }
}

fn report(res: Result<()>) {
    if let Err(e) = res {
        tracing::warn!(error = %e, class = e.class().as_str(), "dropping observation");
    }
}

/// Passthrough writer that counts body bytes and remembers the first status.
///
/// Dropping it before `finish` (the request future was cancelled) still
/// records what was seen, unless the thread is unwinding from a panic.
struct RecordingWriter<'a> {
    inner: &'a mut dyn ResponseWriter,
    metrics: &'a HttpMetrics,
    method: &'a str,
    path: Option<String>,
    request_bytes: u64,
    start: Instant,
    status: Option<StatusCode>,
    written: u64,
    done: bool,
}

impl RecordingWriter<'_> {
    fn finish(&mut self, fallback: Option<StatusCode>) {
        if self.done {
            return;
        }
        self.done = true;

        let status = self.status.or(fallback).unwrap_or(StatusCode::OK);
        self.metrics.record(&Observation {
            method: self.method,
            status: status.as_u16(),
            path: self.path.as_deref(),
            duration: self.start.elapsed(),
            request_bytes: self.request_bytes,
            response_bytes: self.written,
        });
    }
}

impl ResponseWriter for RecordingWriter<'_> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
        self.inner.write_header(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
}

impl Drop for RecordingWriter<'_> {
    fn drop(&mut self) {
        if self.done || std::thread::panicking() {
            return;
        }
        tracing::debug!(method = self.method, written = self.written, "request cancelled before completion");
        self.finish(None);
    }
}

/// A handler wrapped with request instrumentation.
pub struct Instrumented<H> {
    metrics: Arc<HttpMetrics>,
    next: H,
}

impl<H> Instrumented<H> {
    pub fn inner(&self) -> &H {
        &self.next
    }
}

#[async_trait]
impl<H: Handler> Handler for Instrumented<H> {
    async fn serve_http(
        &self,
        req: &Request,
        w: &mut dyn ResponseWriter,
    ) -> std::result::Result<(), HandlerError> {
        self.metrics.instrument(req, w, &self.next).await
    }
}

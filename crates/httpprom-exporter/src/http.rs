//! Host-facing handler chain abstractions.
//!
//! The host owns connections and invokes a chain of [`Handler`]s per request,
//! handing each one a [`ResponseWriter`]. Middleware receives the next handler
//! explicitly through [`MiddlewareHandler`].

use std::error::Error as StdError;
use std::fmt;
use std::io;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};

/// Inbound request with its body already read.
pub type Request = axum::http::Request<Bytes>;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error returned by a handler in the chain. Carries an optional status hint
/// for the host's error page.
#[derive(Debug)]
pub struct HandlerError {
    status: Option<StatusCode>,
    source: BoxError,
}

impl HandlerError {
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self { status: None, source: err.into() }
    }

    pub fn with_status(status: StatusCode, err: impl Into<BoxError>) -> Self {
        Self { status: Some(status), source: err.into() }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Borrow the original error as a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }

    pub fn into_inner(self) -> BoxError {
        self.source
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(s) => write!(f, "{} ({})", self.source, s.as_u16()),
            None => write!(f, "{}", self.source),
        }
    }
}

impl StdError for HandlerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Response-writing surface handed to a handler.
///
/// Semantics follow HTTP/1.1 servers: the first `write_header` wins, and a
/// body write without a prior header implies `200 OK`.
pub trait ResponseWriter: Send {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn write_header(&mut self, status: StatusCode);

    /// Write body bytes, returning how many were accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Write the whole buffer.
    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => return Err(io::Error::new(io::ErrorKind::WriteZero, "response sink closed")),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }
}

/// One link of the handler chain.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn serve_http(&self, req: &Request, w: &mut dyn ResponseWriter) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for std::sync::Arc<H> {
    async fn serve_http(&self, req: &Request, w: &mut dyn ResponseWriter) -> Result<(), HandlerError> {
        (**self).serve_http(req, w).await
    }
}

/// Middleware that decides when (and whether) to call `next`.
#[async_trait]
pub trait MiddlewareHandler: Send + Sync {
    async fn serve_http(
        &self,
        req: &Request,
        w: &mut dyn ResponseWriter,
        next: &dyn Handler,
    ) -> Result<(), HandlerError>;
}

/// In-memory response sink.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status as a client would see it (`200` if nothing was set).
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_response(self) -> Response {
        let mut resp = (self.status(), self.body.freeze()).into_response();
        resp.headers_mut().extend(self.headers);
        resp
    }
}

impl ResponseWriter for BufferedResponse {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }
}

/// Convenience for handlers setting a plain-text body.
pub fn write_text(w: &mut dyn ResponseWriter, status: StatusCode, body: &str) -> io::Result<()> {
    w.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    w.write_header(status);
    w.write_all(body.as_bytes())
}

//! Shared error type across httpprom crates.

use thiserror::Error;

/// Coarse error classes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad configuration or conflicting registration. Fatal at startup.
    Config,
    /// The exposition listener could not be bound. Fatal at startup.
    Bind,
    /// An observation was rejected (label mismatch). Logged and dropped.
    Instrumentation,
    /// Anything else.
    Internal,
}

impl ErrorClass {
    /// String representation used in logs and tests.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Config => "CONFIG",
            ErrorClass::Bind => "BIND",
            ErrorClass::Instrumentation => "INSTRUMENTATION",
            ErrorClass::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Unified error type used by core and exporter.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid config: {0}")]
    Config(String),
    #[error("invalid metric name: {0:?}")]
    InvalidName(String),
    #[error("invalid label name {label:?} for metric {metric}")]
    InvalidLabelName { metric: String, label: String },
    #[error("invalid buckets: {0}")]
    InvalidBuckets(String),
    #[error("metric {name} already registered: {reason}")]
    Conflict { name: String, reason: String },
    #[error("label mismatch for {metric}: expected {expected:?}, got {got:?}")]
    LabelMismatch {
        metric: String,
        expected: Vec<String>,
        got: Vec<String>,
    },
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("internal: {0}")]
    Internal(String),
}

impl MetricsError {
    /// Map the error onto its class.
    pub fn class(&self) -> ErrorClass {
        match self {
            MetricsError::Config(_)
            | MetricsError::InvalidName(_)
            | MetricsError::InvalidLabelName { .. }
            | MetricsError::InvalidBuckets(_)
            | MetricsError::Conflict { .. } => ErrorClass::Config,
            MetricsError::Bind { .. } => ErrorClass::Bind,
            MetricsError::LabelMismatch { .. } => ErrorClass::Instrumentation,
            MetricsError::Internal(_) => ErrorClass::Internal,
        }
    }
}

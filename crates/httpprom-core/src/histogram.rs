//! Histogram bucket specifications.

use crate::error::{MetricsError, Result};

/// Default latency buckets, in seconds.
pub const DEFAULT_LATENCY_BUCKETS: [f64; 10] =
    [0.05, 0.2, 1.0, 3.0, 10.0, 60.0, 120.0, 240.0, 480.0, 960.0];

/// Default size buckets, in bytes (0 .. 10MB).
pub const DEFAULT_SIZE_BUCKETS: [f64; 7] = [
    0.0,
    500.0,
    5_000.0,
    50_000.0,
    500_000.0,
    5_000_000.0,
    10_000_000.0,
];

/// Ordered, strictly increasing bucket upper bounds. `+Inf` is implicit.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSpec {
    bounds: Vec<f64>,
}

impl HistogramSpec {
    /// Validate and build a spec.
    pub fn new(bounds: Vec<f64>) -> Result<Self> {
        if bounds.is_empty() {
            return Err(MetricsError::InvalidBuckets("at least one bucket is required".into()));
        }
        for b in &bounds {
            if !b.is_finite() {
                return Err(MetricsError::InvalidBuckets(format!(
                    "bucket bound {b} is not finite (+Inf is implicit)"
                )));
            }
        }
        for w in bounds.windows(2) {
            if w[0] >= w[1] {
                return Err(MetricsError::InvalidBuckets(format!(
                    "bounds must be strictly increasing ({} >= {})",
                    w[0], w[1]
                )));
            }
        }
        Ok(Self { bounds })
    }

    /// Default request latency buckets, in seconds.
    pub fn latency() -> Self {
        Self { bounds: DEFAULT_LATENCY_BUCKETS.to_vec() }
    }

    /// Default body size buckets, in bytes.
    pub fn size() -> Self {
        Self { bounds: DEFAULT_SIZE_BUCKETS.to_vec() }
    }

    /// Finite upper bounds, strictly increasing.
    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Number of finite bounds; `+Inf` is implicit.
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

//! httpprom core: metric registry, label model and exposition encoding.
//!
//! This crate holds the shared-mutable metric state and its text rendering.
//! It carries no runtime or HTTP dependencies so the same registry can be fed
//! by any producer (the request wrapper, or another side channel later).
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! A bad observation surfaces as `MetricsError`, never as a crash inside the
//! request path.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod histogram;
pub mod labels;
pub mod registry;
pub mod text;

/// Shared result type.
pub use error::{ErrorClass, MetricsError, Result};
pub use histogram::HistogramSpec;
pub use labels::LabelSet;
pub use registry::{CounterVec, HistogramVec, MetricKind, Registry, Snapshot};

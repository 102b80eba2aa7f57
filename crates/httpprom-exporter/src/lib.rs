//! httpprom exporter library entry.
//!
//! Wires the core registry into a request wrapper, an axum middleware, and a
//! standalone exposition listener. Consumed by the demo binary (`main.rs`) and
//! by integration tests.

pub mod axum_layer;
pub mod config;
pub mod http;
pub mod instrument;
pub mod metrics;
pub mod server;

pub use metrics::Metrics;

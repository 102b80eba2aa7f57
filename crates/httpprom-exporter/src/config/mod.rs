//! Exporter config loader (strict parsing).
//!
//! YAML is the native format; `.json` files are read with `serde_json`.

pub mod schema;

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use httpprom_core::error::{MetricsError, Result};

pub use schema::{normalize_address, ExporterConfig, RawConfig, ServiceConfig};

pub fn load_from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)
        .map_err(|e| MetricsError::Config(format!("read config {} failed: {e}", path.display())))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => load_json_str(&s),
        _ => load_from_str(&s),
    }
}

pub fn load_from_str<T: DeserializeOwned>(s: &str) -> Result<T> {
    serde_yaml::from_str(s).map_err(|e| MetricsError::Config(format!("invalid yaml: {e}")))
}

pub fn load_json_str<T: DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| MetricsError::Config(format!("invalid json: {e}")))
}

/// Parse and finalize an exporter section in one step.
pub fn exporter_from_str(s: &str) -> Result<ExporterConfig> {
    load_from_str::<RawConfig>(s)?.finalize()
}

use std::net::{IpAddr, SocketAddr};

use serde::Deserialize;

use httpprom_core::error::{MetricsError, Result};
use httpprom_core::registry::is_valid_metric_name;
use httpprom_core::HistogramSpec;

pub const DEFAULT_PATH: &str = "/metrics";
pub const DEFAULT_ADDRESS: &str = "localhost:9180";
pub const DEFAULT_PORT: u16 = 9180;
pub const DEFAULT_NAMESPACE: &str = "http";

/// Exporter settings as supplied by the host. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub path: Option<String>,

    /// Serve the exposition route on the host's own listener.
    #[serde(default)]
    pub use_host_address: bool,

    #[serde(default)]
    pub namespace: Option<String>,

    /// Add a normalized `path` label to every request metric.
    #[serde(default)]
    pub path_label: bool,

    #[serde(default)]
    pub latency_buckets: Option<Vec<f64>>,

    #[serde(default)]
    pub size_buckets: Option<Vec<f64>>,
}

impl RawConfig {
    /// Apply defaults and validate. The result is never mutated afterwards.
    pub fn finalize(self) -> Result<ExporterConfig> {
        let address = normalize_address(self.address.as_deref().unwrap_or(DEFAULT_ADDRESS))?;

        let path = self.path.unwrap_or_else(|| DEFAULT_PATH.to_string());
        if !path.starts_with('/') {
            return Err(MetricsError::Config(format!("path must start with '/': {path:?}")));
        }

        let namespace = self.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        if !namespace.is_empty() && !is_valid_metric_name(&namespace) {
            return Err(MetricsError::Config(format!("invalid namespace: {namespace:?}")));
        }

        let latency_buckets = match self.latency_buckets {
            Some(b) => HistogramSpec::new(b)?,
            None => HistogramSpec::latency(),
        };
        let size_buckets = match self.size_buckets {
            Some(b) => HistogramSpec::new(b)?,
            None => HistogramSpec::size(),
        };

        Ok(ExporterConfig {
            address,
            path,
            use_host_address: self.use_host_address,
            namespace,
            path_label: self.path_label,
            latency_buckets,
            size_buckets,
        })
    }
}

/// Validated exporter configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExporterConfig {
    pub address: String,
    pub path: String,
    pub use_host_address: bool,
    pub namespace: String,
    pub path_label: bool,
    pub latency_buckets: HistogramSpec,
    pub size_buckets: HistogramSpec,
}

impl ExporterConfig {
    /// Prefix a metric name with the namespace.
    pub fn metric_name(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", self.namespace, name)
        }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            path: DEFAULT_PATH.to_string(),
            use_host_address: false,
            namespace: DEFAULT_NAMESPACE.to_string(),
            path_label: false,
            latency_buckets: HistogramSpec::latency(),
            size_buckets: HistogramSpec::size(),
        }
    }
}

/// Append the default port when the address has none.
///
/// Accepts `host`, `host:port`, IPv4, bare IPv6 (`::1`) and bracketed IPv6.
pub fn normalize_address(addr: &str) -> Result<String> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(MetricsError::Config("address must not be empty".into()));
    }
    if addr.parse::<SocketAddr>().is_ok() {
        return Ok(addr.to_string());
    }
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT).to_string());
    }
    if addr.starts_with('[') {
        return match addr.strip_suffix(']') {
            Some(_) => Ok(format!("{addr}:{DEFAULT_PORT}")),
            None => Err(MetricsError::Config(format!("invalid address: {addr:?}"))),
        };
    }
    match addr.rsplit_once(':') {
        None => Ok(format!("{addr}:{DEFAULT_PORT}")),
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(addr.to_string()),
        Some(_) => Err(MetricsError::Config(format!("invalid address: {addr:?}"))),
    }
}

/// Config for the demo binary: the upstream listener plus the exporter.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default)]
    pub metrics: RawConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            metrics: RawConfig::default(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}

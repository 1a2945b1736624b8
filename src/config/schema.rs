//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the batch gateway binary.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Batch endpoint and dispatcher settings.
    pub batch: BatchConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Settings consumed by the server-side dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchConfig {
    /// Path the batch endpoint is mounted on.
    pub path: String,

    /// Maximum sub-requests in flight per batch connection.
    pub parallel_limit: usize,

    /// Scheme used to build sub-request URLs ("http" or "https").
    pub protocol: String,

    /// Per sub-request timeout in milliseconds.
    pub timeout_ms: u64,

    /// Extra attempts allowed per part after a failure.
    pub retries: u32,

    /// Upper bound of the random retry jitter in milliseconds.
    pub retry_jitter_ms: u64,

    /// Per-attempt retry delay increment in milliseconds.
    pub retry_step_ms: u64,

    /// Authority (`host[:port]`) sub-requests go to.
    /// Defaults to the batch request's own `Host` header.
    pub upstream: Option<String>,

    /// Emit dispatcher log events.
    pub logging: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            path: "/batch".to_string(),
            parallel_limit: 10,
            protocol: "https".to_string(),
            timeout_ms: 5000,
            retries: 0,
            retry_jitter_ms: 5000,
            retry_step_ms: 1000,
            upstream: None,
            logging: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Settings for one client batch connection.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ClientConfig {
    /// Target batch endpoint, e.g. `https://api.example.com/batch`.
    pub url: String,

    /// Extra headers sent on the outer batch request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

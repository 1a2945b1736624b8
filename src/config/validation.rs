//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits and timeouts > 0, scheme known)
//! - Check addresses and authorities parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function over the config
//! - Runs before a config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{BatchConfig, GatewayConfig};

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate the whole gateway configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
    }

    if let Err(batch_errors) = validate_batch(&config.batch) {
        errors.extend(batch_errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the settings a dispatcher runs with.
pub fn validate_batch(config: &BatchConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !config.path.starts_with('/') {
        errors.push(ValidationError::new("batch.path", "must start with '/'"));
    }

    if config.parallel_limit == 0 {
        errors.push(ValidationError::new("batch.parallel_limit", "must be at least 1"));
    }

    if config.protocol != "http" && config.protocol != "https" {
        errors.push(ValidationError::new(
            "batch.protocol",
            format!("expected \"http\" or \"https\", got {:?}", config.protocol),
        ));
    }

    if config.timeout_ms == 0 {
        errors.push(ValidationError::new("batch.timeout_ms", "must be greater than 0"));
    }

    if let Some(upstream) = &config.upstream {
        let valid = Url::parse(&format!("http://{}", upstream))
            .map(|url| url.host_str().is_some() && url.path() == "/" && url.query().is_none())
            .unwrap_or(false);
        if !valid {
            errors.push(ValidationError::new(
                "batch.upstream",
                format!("not a host[:port] authority: {}", upstream),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

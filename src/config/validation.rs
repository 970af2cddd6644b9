//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and the IPv4-only upstream
//! constraint. Every problem is reported, not just the first.

use std::net::{Ipv6Addr, SocketAddr};

use crate::config::schema::ProxyConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
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

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let host = config.upstream.host.trim_matches(|c| c == '[' || c == ']');
    if host.is_empty() {
        errors.push(ValidationError::new("upstream.host", "must not be empty"));
    } else if host.parse::<Ipv6Addr>().is_ok() {
        errors.push(ValidationError::new(
            "upstream.host",
            "the upstream is dialed over IPv4 only; IPv6 literals are not accepted",
        ));
    }
    if config.upstream.port == 0 {
        errors.push(ValidationError::new("upstream.port", "must be non-zero"));
    }
    if config.upstream.request_timeout_ms == 0 {
        errors.push(ValidationError::new("upstream.request_timeout_ms", "must be non-zero"));
    }
    if config.upstream.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("upstream.connect_timeout_ms", "must be non-zero"));
    }

    if config.pool.max_connections == 0 {
        errors.push(ValidationError::new("pool.max_connections", "must be at least 1"));
    }
    if config.pool.idle_timeout_ms == 0 {
        errors.push(ValidationError::new("pool.idle_timeout_ms", "must be non-zero"));
    }
    if config.pool.sweep_interval_ms == 0 {
        errors.push(ValidationError::new("pool.sweep_interval_ms", "must be non-zero"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

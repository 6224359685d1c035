//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, timeout > 0, addresses well formed)
//! - Check stream suffix syntax
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid {field} '{value}': not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("invalid {field} '{value}': expected host:port")]
    InvalidHostPort { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("stream suffix '{0}' must start with '.'")]
    InvalidSuffix(String),

    #[error("limits.max_form_body_bytes ({form}) exceeds limits.max_buffered_body_bytes ({buffered})")]
    FormLargerThanBody { form: usize, buffered: usize },
}

/// Validate a configuration, collecting every violation.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_host_port(&config.listener.bind_address) {
        errors.push(ValidationError::InvalidHostPort {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero("listener.max_connections"));
    }

    let limits = &config.limits;
    for (name, value) in [
        ("limits.max_header_bytes", limits.max_header_bytes),
        ("limits.max_buffered_body_bytes", limits.max_buffered_body_bytes),
        ("limits.stream_chunk_bytes", limits.stream_chunk_bytes),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero(name));
        }
    }
    if limits.max_form_body_bytes > limits.max_buffered_body_bytes {
        errors.push(ValidationError::FormLargerThanBody {
            form: limits.max_form_body_bytes,
            buffered: limits.max_buffered_body_bytes,
        });
    }

    if config.upstream.timeout_secs == 0 {
        errors.push(ValidationError::Zero("upstream.timeout_secs"));
    }
    if config.upstream.max_concurrent_fetches == 0 {
        errors.push(ValidationError::Zero("upstream.max_concurrent_fetches"));
    }
    for suffix in &config.upstream.stream_suffixes {
        if !suffix.starts_with('.') || suffix.len() < 2 {
            errors.push(ValidationError::InvalidSuffix(suffix.clone()));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `host:port` with a numeric port. The host is resolved at bind time, so
/// names are accepted here; IPv6 literals must be bracketed.
fn is_host_port(address: &str) -> bool {
    let Some((host, port)) = address.rsplit_once(':') else {
        return false;
    };
    let host_ok = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']').is_some_and(|ip| !ip.is_empty()),
        None => !host.is_empty() && !host.contains(':'),
    };
    host_ok && port.parse::<u16>().is_ok()
}

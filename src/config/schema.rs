//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the forwarding proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Protocol size limits.
    pub limits: LimitsConfig,

    /// Upstream forwarding settings.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            max_connections: 1024,
        }
    }
}

/// Size ceilings applied while reading requests and upstream responses.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Cumulative ceiling for the request line plus header block.
    pub max_header_bytes: usize,

    /// Largest accepted form submission body.
    pub max_form_body_bytes: usize,

    /// Buffered upstream bodies are truncated past this size.
    pub max_buffered_body_bytes: usize,

    /// Read unit for the streaming relay.
    pub stream_chunk_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 32 * 1024,
            max_form_body_bytes: 4096,
            max_buffered_body_bytes: 16 * 1024 * 1024,
            stream_chunk_bytes: 8192,
        }
    }
}

/// Upstream forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Connect/response timeout for buffered fetches, and the setup
    /// deadline for streaming relays.
    pub timeout_secs: u64,

    /// Sent as `User-Agent` upstream and as `Server` to clients.
    pub user_agent: String,

    /// Path suffixes (case-insensitive) that select the streaming relay.
    pub stream_suffixes: Vec<String>,

    /// Maximum buffered fetches in flight at once.
    pub max_concurrent_fetches: usize,

    /// Grace period for closing an upstream stream connection.
    pub close_grace_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: concat!("NomadProxy/", env!("CARGO_PKG_VERSION")).to_string(),
            stream_suffixes: vec![".mjpeg".to_string()],
            max_concurrent_fetches: 64,
            close_grace_ms: 500,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for cancelled connections to release their sockets.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 5,
        }
    }
}

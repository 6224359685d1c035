//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by `outcome`, `status`
//! - `proxy_request_duration_seconds` (histogram): time to complete a request
//! - `proxy_active_connections` (gauge): current connection count
//! - `proxy_stream_bytes_total` (counter): body bytes relayed by streams
//! - `proxy_upstream_failures_total` (counter): upstream failures by `kind`
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter serving `/metrics` on `addr`.
/// Must run inside the Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record one completed request. `outcome` is the session state name.
pub fn record_request(outcome: &'static str, status: u16, elapsed: Duration) {
    metrics::counter!(
        "proxy_requests_total",
        "outcome" => outcome,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn set_active_connections(count: u64) {
    metrics::gauge!("proxy_active_connections").set(count as f64);
}

pub fn record_stream_bytes(bytes: u64) {
    metrics::counter!("proxy_stream_bytes_total").increment(bytes);
}

pub fn record_upstream_failure(kind: &'static str) {
    metrics::counter!("proxy_upstream_failures_total", "kind" => kind).increment(1);
}

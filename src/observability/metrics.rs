//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tally_proxy_requests_total` (counter): requests by method, status, class
//! - `tally_proxy_request_duration_seconds` (histogram): time to response head
//! - `tally_proxy_exchange_failures_total` (counter): failed exchanges by kind
//! - `tally_proxy_upstream_open_connections` (gauge): open upstream sockets
//! - `tally_proxy_upstream_idle_connections` (gauge): pooled idle sockets
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, class: &'static str, start: Instant) {
    let status = status.to_string();
    metrics::counter!(
        "tally_proxy_requests_total",
        "method" => method.to_string(),
        "status" => status,
        "class" => class
    )
    .increment(1);
    metrics::histogram!("tally_proxy_request_duration_seconds", "class" => class)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_failure(kind: &'static str) {
    metrics::counter!("tally_proxy_exchange_failures_total", "kind" => kind).increment(1);
}

pub fn record_open_connections(open: usize) {
    metrics::gauge!("tally_proxy_upstream_open_connections").set(open as f64);
}

pub fn record_pool(open: usize, idle: usize) {
    record_open_connections(open);
    metrics::gauge!("tally_proxy_upstream_idle_connections").set(idle as f64);
}

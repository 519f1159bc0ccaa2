//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status and cache outcome
//! - `proxy_request_duration_seconds` (histogram): end-to-end latency
//! - `proxy_cache_events_total` (counter): hits, misses, stores, evictions per tier
//! - `proxy_upstream_errors_total` (counter): fetch failures by kind
//! - `proxy_disk_cache_bytes` (gauge): bytes held by the disk tier

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::cache::Tier;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must run inside a Tokio runtime. Failures are logged; the proxy keeps
/// serving without metrics.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, cache: &'static str, start: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "cache" => cache
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_cache_event(tier: Tier, event: &'static str) {
    metrics::counter!("proxy_cache_events_total", "tier" => tier.as_str(), "event" => event).increment(1);
}

pub fn record_upstream_error(kind: &'static str) {
    metrics::counter!("proxy_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn record_disk_cache_bytes(bytes: u64) {
    metrics::gauge!("proxy_disk_cache_bytes").set(bytes as f64);
}

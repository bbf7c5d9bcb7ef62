//! Metrics collection and exposition.
//!
//! # Metrics
//! - `balancer_requests_total` (counter): proxied requests by method, status, node
//! - `balancer_request_duration_seconds` (histogram): latency distribution
//! - `balancer_node_healthy` (gauge): 1=healthy, 0=unhealthy
//! - `balancer_node_in_flight` (gauge): connections counted against a node
//! - `balancer_rejections_total` (counter): requests refused, by kind
//! - `balancer_tunnels_total` (counter): finished WebSocket tunnels, by outcome
//!
//! Recording is a no-op until a recorder is installed, so the core can record
//! unconditionally.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::load_balancer::NodeAddress;

/// Install the Prometheus recorder with an HTTP scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, node: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("node", node.to_string()),
    ];
    metrics::counter!("balancer_requests_total", &labels).increment(1);
    metrics::histogram!("balancer_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_node_health(node: &NodeAddress, healthy: bool) {
    metrics::gauge!("balancer_node_healthy", "node" => node.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_in_flight(node: &NodeAddress, count: usize) {
    metrics::gauge!("balancer_node_in_flight", "node" => node.to_string()).set(count as f64);
}

pub fn record_rejection(kind: &'static str) {
    metrics::counter!("balancer_rejections_total", "kind" => kind).increment(1);
}

pub fn record_tunnel(outcome: &'static str) {
    metrics::counter!("balancer_tunnels_total", "outcome" => outcome).increment(1);
}

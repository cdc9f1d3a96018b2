//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics for both process roles
//! - Expose a Prometheus-compatible scrape endpoint per process
//!
//! # Metrics
//! - `gateway_connections_accepted_total` (counter): master accepts
//! - `gateway_handoffs_total` (counter): sockets passed, by worker
//! - `gateway_handoff_failures_total` (counter): dropped connections, by worker
//! - `gateway_live_workers` (gauge): occupied worker slots
//! - `gateway_worker_respawns_total` (counter): replacements, by worker
//! - `gateway_connections_adopted_total` (counter): worker adoptions
//! - `gateway_requests_total` (counter): proxied requests by method, status, target
//! - `gateway_request_duration_seconds` (histogram): proxy latency
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so metrics stay
//!   off unless `observability.metrics_enabled` is set
//! - Each process serves its own endpoint; workers use
//!   `metrics_address.port + 1 + index`

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metric_descriptions();
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Scrape address for worker `index`, offset from the master's address.
pub fn worker_metrics_address(base: SocketAddr, index: usize) -> SocketAddr {
    let offset = u16::try_from(index + 1).unwrap_or(u16::MAX);
    SocketAddr::new(base.ip(), base.port().saturating_add(offset))
}

fn register_metric_descriptions() {
    describe_counter!(
        "gateway_connections_accepted_total",
        "Connections accepted on the public listener"
    );
    describe_counter!(
        "gateway_handoffs_total",
        "Connections passed to a worker"
    );
    describe_counter!(
        "gateway_handoff_failures_total",
        "Connections dropped because the handoff failed"
    );
    describe_gauge!("gateway_live_workers", "Occupied worker slots");
    describe_counter!(
        "gateway_worker_respawns_total",
        "Worker processes replaced after exit"
    );
    describe_counter!(
        "gateway_connections_adopted_total",
        "Connections adopted by this worker"
    );
    describe_counter!("gateway_requests_total", "Proxied HTTP requests");
    describe_histogram!(
        "gateway_request_duration_seconds",
        "Duration of proxied requests in seconds"
    );
}

pub fn record_accepted() {
    counter!("gateway_connections_accepted_total").increment(1);
}

pub fn record_handoff(worker: usize) {
    counter!("gateway_handoffs_total", "worker" => worker.to_string()).increment(1);
}

pub fn record_handoff_failure(worker: usize) {
    counter!("gateway_handoff_failures_total", "worker" => worker.to_string()).increment(1);
}

pub fn set_live_workers(count: usize) {
    gauge!("gateway_live_workers").set(count as f64);
}

pub fn record_respawn(worker: usize) {
    counter!("gateway_worker_respawns_total", "worker" => worker.to_string()).increment(1);
}

pub fn record_adopted() {
    counter!("gateway_connections_adopted_total").increment(1);
}

/// Record one proxied request with its outcome.
pub fn record_request(method: &str, status: u16, target: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("target", target.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

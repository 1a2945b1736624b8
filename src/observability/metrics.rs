//! Metrics collection and exposition.
//!
//! # Metrics
//! - `batch_connections_total` (counter): batch connections accepted
//! - `batch_parts_total` (counter): replies written, by outcome
//! - `batch_retries_total` (counter): sub-request retries scheduled
//! - `batch_in_flight` (gauge): sub-requests currently running
//! - `batch_sub_request_duration_seconds` (histogram): per attempt, by status

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "batch_connections_total";
    pub const PARTS_TOTAL: &str = "batch_parts_total";
    pub const RETRIES_TOTAL: &str = "batch_retries_total";
    pub const IN_FLIGHT: &str = "batch_in_flight";
    pub const SUB_REQUEST_DURATION_SECONDS: &str = "batch_sub_request_duration_seconds";
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
}

/// `outcome` is one of `success`, `error_status` or `failure`.
pub fn record_part(outcome: &'static str) {
    counter!(names::PARTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_retry() {
    counter!(names::RETRIES_TOTAL).increment(1);
}

pub fn in_flight_started() {
    gauge!(names::IN_FLIGHT).increment(1.0);
}

pub fn in_flight_finished(count: usize) {
    if count > 0 {
        gauge!(names::IN_FLIGHT).decrement(count as f64);
    }
}

/// One sub-request attempt. `status` is `None` when no response arrived.
pub fn record_sub_request(status: Option<u16>, start: Instant) {
    let status = status.map_or_else(|| "none".to_string(), |s| s.to_string());
    histogram!(names::SUB_REQUEST_DURATION_SECONDS, "status" => status).record(start.elapsed().as_secs_f64());
}

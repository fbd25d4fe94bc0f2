//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gate_admissions_total` (counter): admitted requests by `path` (fast, delayed)
//! - `gate_rejections_total` (counter): rejected requests by `reason`
//! - `gate_cancellations_total` (counter): callers gone while queued
//! - `gate_queue_wait_seconds` (histogram): time spent queued, by `outcome`
//! - `gate_pool_occupancy` (gauge): permits held, by `pool` (running, queue)
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until
//!   [`init_metrics`] installs the Prometheus exporter

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_admission(path: &'static str, waited: Duration) {
    counter!("gate_admissions_total", "path" => path).increment(1);
    if !waited.is_zero() {
        histogram!("gate_queue_wait_seconds", "outcome" => "admitted").record(waited.as_secs_f64());
    }
}

pub fn record_rejection(reason: &'static str, waited: Duration) {
    counter!("gate_rejections_total", "reason" => reason).increment(1);
    if !waited.is_zero() {
        histogram!("gate_queue_wait_seconds", "outcome" => reason).record(waited.as_secs_f64());
    }
}

pub fn record_cancellation(waited: Duration) {
    counter!("gate_cancellations_total").increment(1);
    histogram!("gate_queue_wait_seconds", "outcome" => "cancelled").record(waited.as_secs_f64());
}

pub fn record_occupancy(pool: &'static str, occupancy: usize) {
    gauge!("gate_pool_occupancy", "pool" => pool).set(occupancy as f64);
}

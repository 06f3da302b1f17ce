//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define resilience metrics (breaker transitions, retries, admissions)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-dependency and per-segment metrics
//!
//! # Metrics
//! - `resilience_breaker_transitions_total` (counter): by breaker, from, to
//! - `resilience_breaker_rejections_total` (counter): fast-failed calls
//! - `resilience_retry_attempts_total` (counter): retries scheduled
//! - `resilience_retry_exhausted_total` (counter)
//! - `resilience_rate_limit_decisions_total` (counter): by namespace, outcome
//! - `resilience_bucket_store_errors_total` (counter): by operation
//! - `resilience_rate_limit_buckets_purged_total` (counter): expired buckets dropped
//! - `resilience_pool_acquisitions_total` (counter): by segment, outcome
//! - `resilience_pool_stale_reclaimed_total` (counter): by segment
//! - `resilience_pool_utilization_percent` (gauge): by segment
//! - `resilience_degraded_dependencies` (gauge)
//! - `resilience_degradation_ratio` (gauge)
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; with no recorder
//!   installed every call is a no-op, so library users pay nothing
//! - Only the binary installs the Prometheus exporter

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_breaker_transition(breaker: &str, from: &'static str, to: &'static str) {
    counter!(
        "resilience_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from,
        "to" => to
    )
    .increment(1);
}

pub fn record_breaker_rejected(breaker: &str) {
    counter!("resilience_breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_retry(attempt: u32) {
    counter!("resilience_retry_attempts_total", "attempt" => attempt.to_string()).increment(1);
}

pub fn record_retry_exhausted() {
    counter!("resilience_retry_exhausted_total").increment(1);
}

pub fn record_rate_limit(namespace: &str, allowed: bool) {
    let outcome = if allowed { "allowed" } else { "limited" };
    counter!(
        "resilience_rate_limit_decisions_total",
        "namespace" => namespace.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_store_error(operation: &'static str) {
    counter!("resilience_bucket_store_errors_total", "operation" => operation).increment(1);
}

pub fn record_pool_acquire(segment: &str, admitted: bool) {
    let outcome = if admitted { "admitted" } else { "exhausted" };
    counter!(
        "resilience_pool_acquisitions_total",
        "segment" => segment.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_stale_reclaimed(segment: &str, count: usize) {
    counter!("resilience_pool_stale_reclaimed_total", "segment" => segment.to_string())
        .increment(count as u64);
}

pub fn record_pool_utilization(segment: &str, percent: f64) {
    gauge!("resilience_pool_utilization_percent", "segment" => segment.to_string()).set(percent);
}

pub fn record_buckets_purged(count: usize) {
    counter!("resilience_rate_limit_buckets_purged_total").increment(count as u64);
}

pub fn record_degradation(degraded: usize, ratio: f64) {
    gauge!("resilience_degraded_dependencies").set(degraded as f64);
    gauge!("resilience_degradation_ratio").set(ratio);
}

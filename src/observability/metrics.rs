//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, status
//! - `gateway_request_duration_seconds` (histogram): latency by route
//! - `gateway_rate_limited_total` (counter): rejected caller requests
//! - `gateway_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_circuit_transitions_total` (counter): by from/to state
//! - `gateway_cache_lookups_total` (counter): by result (hit/miss)
//! - `gateway_cache_entries` (gauge): stored entries
//! - `gateway_upstream_retries_total` (counter): by error kind
//! - `gateway_stream_events_total` (counter): relayed events by kind
//!
//! Without an installed recorder every call is a no-op, so components can
//! record unconditionally.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::resilience::circuit_breaker::CircuitState;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &'static str, status: u16, start: Instant) {
    counter!("gateway_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
    histogram!("gateway_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(reason: &'static str) {
    counter!("gateway_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_breaker_state(state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("gateway_circuit_state").set(value);
}

pub fn record_breaker_transition(from: CircuitState, to: CircuitState) {
    counter!(
        "gateway_circuit_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    record_breaker_state(to);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("gateway_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(size: usize) {
    gauge!("gateway_cache_entries").set(size as f64);
}

pub fn record_retry(kind: &'static str) {
    counter!("gateway_upstream_retries_total", "kind" => kind).increment(1);
}

pub fn record_stream_event(kind: &'static str) {
    counter!("gateway_stream_events_total", "kind" => kind).increment(1);
}

//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ingress_reconcile_total` (counter): reconciliation cycles by result
//! - `ingress_reconcile_duration_seconds` (histogram): render + apply latency
//! - `ingress_config_last_reload_success` (gauge): 1 if the last apply succeeded
//! - `ingress_worker_restarts_total` (counter): unexpected worker exits respawned
//! - `ingress_queue_requeues_total` (counter): keys retried after a failed sync
//! - `ingress_passthrough_connections_total` (counter): by selected route
//! - `ingress_passthrough_active_connections` (gauge)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_reconcile(result: &'static str, started: Instant) {
    counter!("ingress_reconcile_total", "result" => result).increment(1);
    histogram!("ingress_reconcile_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_reload_success(success: bool) {
    gauge!("ingress_config_last_reload_success").set(if success { 1.0 } else { 0.0 });
}

pub fn record_worker_restart() {
    counter!("ingress_worker_restarts_total").increment(1);
}

pub fn record_requeue() {
    counter!("ingress_queue_requeues_total").increment(1);
}

pub fn record_passthrough_connection(route: &str) {
    counter!("ingress_passthrough_connections_total", "route" => route.to_string()).increment(1);
}

pub fn set_passthrough_active(count: u64) {
    gauge!("ingress_passthrough_active_connections").set(count as f64);
}

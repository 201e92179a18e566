//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define sync metrics (sessions, pushes, applies, heartbeats, auth rejections)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `cluster_sync_sessions_active` (gauge): live control plane sessions
//! - `cluster_sync_config_pushes_total` (counter): reconfigure payloads sent
//! - `cluster_sync_push_dropped_total` (counter): payloads dropped, by reason
//! - `cluster_sync_auth_rejections_total` (counter): rejected peers, by reason
//! - `cluster_sync_config_applied_total` (counter): data plane applies, by result
//! - `cluster_sync_heartbeats_total` (counter): heartbeats, by side
//!
//! # Design Decisions
//! - Call sites use the helpers below, never the macros directly
//! - Without an installed recorder every helper is a no-op

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_opened() {
    gauge!("cluster_sync_sessions_active").increment(1.0);
}

pub fn record_session_closed() {
    gauge!("cluster_sync_sessions_active").decrement(1.0);
}

pub fn record_config_push() {
    counter!("cluster_sync_config_pushes_total").increment(1);
}

pub fn record_push_dropped(reason: &'static str) {
    counter!("cluster_sync_push_dropped_total", "reason" => reason).increment(1);
}

pub fn record_auth_rejection(reason: &'static str) {
    counter!("cluster_sync_auth_rejections_total", "reason" => reason).increment(1);
}

pub fn record_config_applied(result: &'static str) {
    counter!("cluster_sync_config_applied_total", "result" => result).increment(1);
}

pub fn record_heartbeat(side: &'static str) {
    counter!("cluster_sync_heartbeats_total", "side" => side).increment(1);
}

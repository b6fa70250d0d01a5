//! Metrics collection and export for Beacon.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use beacon_core::heartbeat::{EvictionReason, SweepReport};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const MESSAGES_TOTAL: &str = "beacon_messages_total";
    pub const MESSAGES_BYTES: &str = "beacon_messages_bytes";
    pub const NOTIFICATIONS_TOTAL: &str = "beacon_notifications_total";
    pub const DELIVERIES_TOTAL: &str = "beacon_deliveries_total";
    pub const PUBLISH_SECONDS: &str = "beacon_publish_seconds";
    pub const HEARTBEAT_PINGS_TOTAL: &str = "beacon_heartbeat_pings_total";
    pub const EVICTIONS_TOTAL: &str = "beacon_evictions_total";
    pub const ERRORS_TOTAL: &str = "beacon_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of inbound frames processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of inbound frames processed");
    metrics::describe_counter!(
        names::NOTIFICATIONS_TOTAL,
        "Publish requests by outcome"
    );
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Notification frames delivered to subscribers"
    );
    metrics::describe_histogram!(
        names::PUBLISH_SECONDS,
        "Time to validate and fan out one notification"
    );
    metrics::describe_counter!(names::HEARTBEAT_PINGS_TOTAL, "Heartbeat pings by result");
    metrics::describe_counter!(names::EVICTIONS_TOTAL, "Connections evicted by the heartbeat");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an inbound frame.
pub fn record_message(bytes: usize, kind: &str) {
    counter!(names::MESSAGES_TOTAL, "kind" => kind.to_string()).increment(1);
    counter!(names::MESSAGES_BYTES, "kind" => kind.to_string()).increment(bytes as u64);
}

/// Record one publish request.
///
/// `outcome` is `delivered`, `no-subscribers` or `rejected`.
pub fn record_publish(outcome: &'static str, recipients: usize, seconds: f64) {
    counter!(names::NOTIFICATIONS_TOTAL, "outcome" => outcome).increment(1);
    counter!(names::DELIVERIES_TOTAL).increment(recipients as u64);
    histogram!(names::PUBLISH_SECONDS).record(seconds);
}

/// Record the outcome of a heartbeat sweep.
pub fn record_sweep(report: &SweepReport) {
    counter!(names::HEARTBEAT_PINGS_TOTAL, "result" => "sent").increment(report.pinged as u64);
    counter!(names::HEARTBEAT_PINGS_TOTAL, "result" => "failed").increment(report.failed as u64);
    for (_, reason) in &report.evicted {
        let reason = match reason {
            EvictionReason::SocketClosed => "socket-closed",
            EvictionReason::MissedPong => "missed-pong",
        };
        counter!(names::EVICTIONS_TOTAL, "reason" => reason).increment(1);
    }
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

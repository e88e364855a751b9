//! Metrics collection and export for Beacon.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use beacon_core::{Hub, HubStats};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const ONLINE_IDENTITIES: &str = "beacon_online_identities";
    pub const HANDSHAKES_REJECTED: &str = "beacon_handshakes_rejected_total";
    pub const EVENTS_DELIVERED: &str = "beacon_events_delivered_total";
    pub const EVENTS_DROPPED: &str = "beacon_events_dropped_total";
    pub const ENCODE_FAILURES: &str = "beacon_encode_failures_total";
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
    metrics::describe_gauge!(
        names::ONLINE_IDENTITIES,
        "Identities with at least one live connection"
    );
    metrics::describe_counter!(
        names::HANDSHAKES_REJECTED,
        "Upgrade requests refused during authentication"
    );
    metrics::describe_counter!(names::EVENTS_DELIVERED, "Events queued onto an outbox");
    metrics::describe_counter!(
        names::EVENTS_DROPPED,
        "Events discarded because an outbox was full"
    );
    metrics::describe_counter!(
        names::ENCODE_FAILURES,
        "Deliveries abandoned because the event could not be encoded"
    );

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

/// Record a refused upgrade.
pub fn record_handshake_rejected(reason: &str) {
    counter!(names::HANDSHAKES_REJECTED, "reason" => reason.to_string()).increment(1);
}

/// Publish a snapshot of hub statistics.
pub fn report_hub_stats(stats: &HubStats) {
    gauge!(names::ONLINE_IDENTITIES).set(stats.online_identities as f64);
    counter!(names::EVENTS_DELIVERED).absolute(stats.events_delivered);
    counter!(names::EVENTS_DROPPED).absolute(stats.events_dropped);
    counter!(names::ENCODE_FAILURES).absolute(stats.encode_failures);
}

/// Publish hub statistics every `interval` until the task is aborted.
pub fn spawn_hub_reporter(hub: Hub, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            report_hub_stats(&hub.stats());
        }
    })
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

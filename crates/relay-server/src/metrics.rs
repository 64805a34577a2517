//! Metrics collection and export for the relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Hub-side counters live in the core's
//! `RelayStats` and are mirrored here periodically.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tenvis_relay_core::{CloseReason, Relay, RelayStatsSnapshot};
use tokio::task::JoinHandle;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "relay_connections_rejected_total";
    pub const DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
    pub const MESSAGES_TOTAL: &str = "relay_messages_total";
    pub const CONTROL_MESSAGES_TOTAL: &str = "relay_control_messages_total";
    pub const DELIVERIES_TOTAL: &str = "relay_deliveries_total";
    pub const EVICTIONS_TOTAL: &str = "relay_evictions_total";
    pub const DECODE_ERRORS_TOTAL: &str = "relay_decode_errors_total";
    pub const OVERSIZED_TOTAL: &str = "relay_oversized_frames_total";
    pub const REGISTERED: &str = "relay_registered_connections";
}

/// Describe every metric to the installed recorder.
///
/// Descriptions given before a recorder is installed are lost.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of upgraded WebSocket connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Upgrades refused because the connection limit was reached"
    );
    metrics::describe_counter!(
        names::DISCONNECTIONS_TOTAL,
        "Closed connections, labelled by close reason"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Messages accepted for broadcast");
    metrics::describe_counter!(
        names::CONTROL_MESSAGES_TOTAL,
        "Liveness messages answered locally"
    );
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Messages placed on outbound queues"
    );
    metrics::describe_counter!(names::EVICTIONS_TOTAL, "Slow consumers evicted");
    metrics::describe_counter!(names::DECODE_ERRORS_TOTAL, "Malformed payloads skipped");
    metrics::describe_counter!(
        names::OVERSIZED_TOTAL,
        "Connections closed for oversized frames"
    );
    metrics::describe_gauge!(names::REGISTERED, "Connections in the broadcast registry");

    info!("Metrics initialized");
}

/// Install the Prometheus recorder, start its listener and describe the
/// metrics.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    init_metrics();

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

/// Record why a connection ended.
pub fn record_close(reason: &CloseReason) {
    counter!(names::DISCONNECTIONS_TOTAL, "reason" => reason.label()).increment(1);
}

/// Record an upgrade refused at the connection limit.
pub fn record_rejection() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Mirror a stats snapshot into the exported metrics.
pub fn record_stats(stats: &RelayStatsSnapshot) {
    counter!(names::MESSAGES_TOTAL).absolute(stats.messages_admitted);
    counter!(names::CONTROL_MESSAGES_TOTAL).absolute(stats.control_messages);
    counter!(names::DELIVERIES_TOTAL).absolute(stats.deliveries);
    counter!(names::EVICTIONS_TOTAL).absolute(stats.evictions);
    counter!(names::DECODE_ERRORS_TOTAL).absolute(stats.decode_errors);
    counter!(names::OVERSIZED_TOTAL).absolute(stats.oversized_frames);
    gauge!(names::REGISTERED).set(stats.active_connections as f64);
}

/// Background task mirroring relay stats into the metrics.
///
/// The task stops when this handle is dropped.
pub struct StatsExporter {
    task: JoinHandle<()>,
}

impl Drop for StatsExporter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Periodically mirror the relay's stats while the returned handle lives.
#[must_use]
pub fn spawn_stats_exporter(relay: Relay, every: Duration) -> StatsExporter {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            record_stats(&relay.stats());
        }
    });
    StatsExporter { task }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; recording must be a no-op
        let _guard = ConnectionMetricsGuard::new();
        record_close(&CloseReason::Evicted);
        record_rejection();
    }

    #[test]
    fn test_descriptions_reach_installed_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            init_metrics();
            record_connection();
            record_close(&CloseReason::Evicted);
        });

        let rendered = handle.render();
        assert!(rendered.contains("# HELP relay_connections_total Total number of connections"));
        assert!(rendered.contains("relay_disconnections_total{reason=\"evicted\"} 1"));
    }

    #[tokio::test]
    async fn test_stats_exporter_stops_on_drop() {
        let relay = Relay::spawn(tenvis_relay_core::RelayConfig::default());
        let exporter = spawn_stats_exporter(relay, Duration::from_millis(10));
        let task = exporter.task.abort_handle();
        assert!(!task.is_finished());

        drop(exporter);
        for _ in 0..100 {
            if task.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(task.is_finished());
    }

    #[test]
    fn test_record_stats() {
        let stats = RelayStatsSnapshot {
            active_connections: 3,
            messages_admitted: 10,
            deliveries: 30,
            ..Default::default()
        };
        record_stats(&stats);
    }
}

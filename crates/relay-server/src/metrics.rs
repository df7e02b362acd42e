//! Prometheus recorder installation and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global metrics recorder.
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Sockets registered (counter).
pub const RELAY_CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Registered sockets that ended (counter, labels: reason).
pub const RELAY_DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Currently registered sockets (gauge).
pub const RELAY_CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Registered lifetime of a socket (histogram).
pub const RELAY_CONNECTION_DURATION_SECONDS: &str = "relay_connection_duration_seconds";
/// Envelopes delivered to at least one recipient (counter, labels: kind).
pub const RELAY_MESSAGES_ROUTED_TOTAL: &str = "relay_messages_routed_total";
/// Envelopes whose target or group had no recipients (counter, labels: kind).
pub const RELAY_ROUTING_MISSES_TOTAL: &str = "relay_routing_misses_total";
/// Frames dropped on full or closed outbound queues (counter).
pub const RELAY_SEND_DROPS_TOTAL: &str = "relay_send_drops_total";
/// Inbound frames that failed to decode (counter).
pub const RELAY_DECODE_ERRORS_TOTAL: &str = "relay_decode_errors_total";
/// Upgrades refused during setup (counter, labels: reason).
pub const RELAY_SETUP_REJECTIONS_TOTAL: &str = "relay_setup_rejections_total";
/// Live groups (gauge).
pub const RELAY_GROUPS_ACTIVE: &str = "relay_groups_active";

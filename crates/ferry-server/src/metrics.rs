//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if another recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Broadcast drops total (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Sessions closed for a bad control message (counter).
pub const WS_PROTOCOL_ERRORS_TOTAL: &str = "ws_protocol_errors_total";
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Channels with at least one subscriber (gauge).
pub const CHANNELS_ACTIVE: &str = "channels_active";
/// Entity bus events published (counter, labels: kind).
pub const BUS_EVENTS_TOTAL: &str = "bus_events_total";
/// Events skipped by lagging bus listeners (counter).
pub const BUS_LAGGED_TOTAL: &str = "bus_lagged_total";
/// Node connection metrics, recorded by `ferry-node`.
pub use ferry_node::metrics::{
    NODE_CONNECTION_FAILURES_TOTAL, NODE_DIALS_TOTAL, NODE_LEASES_TOTAL,
    NODE_PUSH_PULL_TIMEOUTS_TOTAL,
};
/// Node health checks (counter, labels: status).
pub const NODE_HEALTH_CHECKS_TOTAL: &str = "node_health_checks_total";

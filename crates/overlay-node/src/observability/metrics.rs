//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `overlay_messages_received_total` - deliveries pulled from the control topic
//! - `overlay_decode_failures_total` - deliveries that did not decode
//! - `overlay_messages_dispatched_total` - handled messages by operation
//! - `overlay_publish_failures_total` - failed reply broadcasts
//! - `overlay_inbound_dropped_total` - deliveries dropped on a full inbound queue
//! - `overlay_connection_attempts_total` - connection attempts by source and outcome
//! - `overlay_connected_peers` - peers with an open connection
//! - `overlay_known_peers` - entries in the peer book

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Install the Prometheus recorder.
///
/// With an address, metrics are also served over HTTP on `/metrics`. Without
/// one, the recorder still collects and the returned handle can render them.
pub fn init_metrics(
    listen_addr: Option<SocketAddr>,
) -> Result<Option<PrometheusHandle>, Box<dyn std::error::Error + Send + Sync>> {
    let handle = match listen_addr {
        Some(addr) => {
            PrometheusBuilder::new().with_http_listener(addr).install()?;
            tracing::info!(addr = %addr, "Prometheus exporter listening");
            None
        }
        None => Some(PrometheusBuilder::new().install_recorder()?),
    };

    register_metric_descriptions();
    Ok(handle)
}

fn register_metric_descriptions() {
    // Protocol
    describe_counter!(
        "overlay_messages_received_total",
        "Total deliveries received on the control topic"
    );
    describe_counter!(
        "overlay_decode_failures_total",
        "Total deliveries dropped because they did not decode"
    );
    describe_counter!(
        "overlay_messages_dispatched_total",
        "Total control messages handled, by operation"
    );
    describe_counter!(
        "overlay_publish_failures_total",
        "Total reply broadcasts that failed"
    );
    describe_counter!(
        "overlay_inbound_dropped_total",
        "Total deliveries dropped because the inbound queue was full"
    );

    // Discovery
    describe_counter!(
        "overlay_connection_attempts_total",
        "Total connection attempts, by peer source and outcome"
    );
    describe_gauge!("overlay_connected_peers", "Number of connected peers");
    describe_gauge!("overlay_known_peers", "Number of peers in the peer book");
}

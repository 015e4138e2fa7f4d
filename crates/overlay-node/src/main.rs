//! Overlay Node - peer-to-peer overlay participant

use anyhow::anyhow;
use overlay_node::network::swarm::{build_network, Network};
use overlay_node::network::transport::Topic;
use overlay_node::network::types::{spawn_cleanup_loop, PeerBook, PeerRecord};
use overlay_node::network::{DiscoveryCoordinator, NodeConfig};
use overlay_node::observability::{init_metrics, init_tracing, shutdown_tracing, TracingConfig};
use overlay_node::protocol::{MessageBuilder, ProtocolServer};
use overlay_node::version::{full_version, VERSION};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(&TracingConfig::from_env()).map_err(|e| anyhow!(e))?;

    let config = NodeConfig::from_env();
    info!(version = %full_version(), topic = %config.pubsub_topic, "Starting overlay node");

    let _prometheus = init_metrics(config.metrics_addr).map_err(|e| anyhow!(e))?;

    let Network {
        local_peer_id,
        handle,
        subscription,
        announcements,
        event_loop,
    } = build_network(&config)?;
    info!(peer_id = %local_peer_id, "P2P network initialized");

    // The swarm outlives the other tasks so the dispatcher can still leave the
    // topic on shutdown.
    let swarm_cancel = CancellationToken::new();
    let swarm_task = event_loop.spawn(swarm_cancel.clone());
    let handle = Arc::new(handle);
    let cancel = CancellationToken::new();

    let peers = PeerBook::new();
    let builder = Arc::new(MessageBuilder::new(VERSION));
    let server = ProtocolServer::new(
        local_peer_id,
        handle.clone(),
        builder.clone(),
        peers.clone(),
        config.protocol(),
    );
    let mut dispatcher = server.spawn(subscription, cancel.clone());
    let cleanup = spawn_cleanup_loop(
        peers,
        config.cleanup_interval,
        config.stale_peer_max_age,
        cancel.clone(),
    );

    let coordinator = DiscoveryCoordinator::new(handle.clone(), handle.clone(), config.discovery());
    let local_discovery = coordinator.spawn_local_discovery(announcements, cancel.clone());
    let bootstrap_peers = bootstrap_records(&config);
    let discovery = {
        let cancel = cancel.clone();
        let announce = startup_ping(handle.clone(), builder);
        let delay = config.initial_ping_delay;
        tokio::spawn(async move {
            coordinator
                .run_startup(&bootstrap_peers, delay, announce, cancel)
                .await;
        })
    };

    let mut dispatcher_done = false;
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for interrupt, shutting down"),
        },
        _ = &mut dispatcher => {
            info!("Dispatcher finished, shutting down");
            dispatcher_done = true;
        }
    }

    cancel.cancel();
    if !dispatcher_done {
        if let Err(e) = dispatcher.await {
            warn!(error = %e, "Dispatcher task failed");
        }
    }
    for (name, task) in [("discovery", discovery), ("cleanup", cleanup)] {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "Background task failed");
        }
    }
    if let Err(e) = local_discovery.await {
        warn!(error = %e, "Local discovery task failed");
    }

    swarm_cancel.cancel();
    if let Err(e) = swarm_task.await {
        warn!(error = %e, "Swarm task failed");
    }

    info!("Overlay node stopped");
    shutdown_tracing();
    Ok(())
}

fn bootstrap_records(config: &NodeConfig) -> Vec<PeerRecord> {
    config
        .bootstrap_peers
        .iter()
        .filter_map(|addr| match PeerRecord::from_p2p_addr(addr) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Skipping bootstrap address");
                None
            }
        })
        .collect()
}

/// Broadcast a ping so peers reached during bootstrap record us.
async fn startup_ping(topic: Arc<dyn Topic>, builder: Arc<MessageBuilder>) {
    match topic.publish(builder.ping()).await {
        Ok(()) => info!("Broadcast startup ping"),
        Err(e) => warn!(error = %e, "Failed to broadcast startup ping"),
    }
}

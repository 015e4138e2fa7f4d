//! Swarm Builder
//!
//! Handles libp2p swarm creation with TCP/QUIC transports, TLS or noise
//! encryption, yamux multiplexing and DNS resolution, then wires the swarm to
//! its event loop and handle.

use super::super::behaviour::OverlayBehaviour;
use super::super::config::NodeConfig;
use super::super::transport::Delivery;
use super::super::types::{short_id, PeerRecord};
use super::event_loop::EventLoop;
use super::handle::{GossipSubscription, SwarmHandle};
use anyhow::{Context, Result};
use libp2p::{gossipsub, noise, swarm::Swarm, tcp, tls, yamux, PeerId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A started swarm, split into the parts the rest of the node consumes.
pub struct Network {
    pub local_peer_id: PeerId,
    pub handle: SwarmHandle,
    /// Control topic deliveries for the protocol dispatcher
    pub subscription: GossipSubscription,
    /// Peers announced on the local network, for the discovery coordinator
    pub announcements: mpsc::UnboundedReceiver<PeerRecord>,
    /// Must be spawned for any of the above to make progress
    pub event_loop: EventLoop,
}

/// Creates and configures a libp2p swarm
pub fn build_swarm(config: &NodeConfig) -> Result<(Swarm<OverlayBehaviour>, PeerId)> {
    let config_for_behaviour = config.clone();
    let idle_timeout = config.connection_idle_timeout;

    let mut swarm = libp2p::SwarmBuilder::with_new_identity()
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            (tls::Config::new, noise::Config::new),
            yamux::Config::default,
        )?
        .with_quic()
        .with_dns()?
        .with_behaviour(move |key| {
            debug!(
                peer_id_short = %short_id(&key.public().to_peer_id()),
                "Created swarm identity"
            );
            OverlayBehaviour::new(key, &config_for_behaviour)
        })?
        .with_swarm_config(move |c| c.with_idle_connection_timeout(idle_timeout))
        .build();

    let local_peer_id = *swarm.local_peer_id();

    for addr in &config.listen_addrs {
        swarm
            .listen_on(addr.clone())
            .with_context(|| format!("Failed to listen on {addr}"))?;
        debug!(addr = %addr, "Configured listen address");
    }

    // Bootstrap peers double as DHT entry points.
    let mut seeded = 0;
    for addr in &config.bootstrap_peers {
        match PeerRecord::from_p2p_addr(addr) {
            Ok(record) => {
                for transport_addr in record.addrs {
                    swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&record.peer_id, transport_addr);
                    seeded += 1;
                }
            }
            Err(e) => warn!(error = %e, "Skipping bootstrap address"),
        }
    }

    if seeded > 0 {
        swarm
            .behaviour_mut()
            .kademlia
            .bootstrap()
            .context("Failed to bootstrap the DHT")?;
        info!(addresses = seeded, "DHT bootstrap started");
    } else {
        info!("No bootstrap addresses, DHT fills from local discovery only");
    }

    Ok((swarm, local_peer_id))
}

/// Build the swarm, join the control topic and split it into handle,
/// subscription, announcements and event loop.
pub fn build_network(config: &NodeConfig) -> Result<Network> {
    let (mut swarm, local_peer_id) = build_swarm(config)?;

    let topic = gossipsub::IdentTopic::new(config.pubsub_topic.clone());
    swarm
        .behaviour_mut()
        .gossipsub
        .subscribe(&topic)
        .context("Failed to subscribe to the control topic")?;
    info!(topic = %config.pubsub_topic, "Joined control topic");

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (delivery_tx, delivery_rx) = mpsc::channel::<Delivery>(config.inbound_queue_capacity.max(1));
    let (announcement_tx, announcement_rx) = mpsc::unbounded_channel();

    let handle = SwarmHandle::new(local_peer_id, command_tx);
    let subscription = GossipSubscription::new(delivery_rx, handle.clone());
    let event_loop = EventLoop::new(swarm, topic, command_rx, delivery_tx, announcement_tx);

    Ok(Network {
        local_peer_id,
        handle,
        subscription,
        announcements: announcement_rx,
        event_loop,
    })
}

//! libp2p NetworkBehaviour Configuration
//!
//! Combines multiple libp2p protocols into a single network behaviour:
//! - Gossipsub: broadcast of control messages on the overlay topic
//! - Identify: peer information exchange (protocol version, listen addresses)
//! - mDNS: local network peer announcements
//! - Kademlia: DHT used for bootstrapping and rendezvous provider records
//! - Connection limits: cap on established connections

use super::config::NodeConfig;
use crate::version::PROTOCOL_VERSION;
use libp2p::{
    connection_limits, gossipsub, identify, identity::Keypair, kad, mdns,
    swarm::NetworkBehaviour,
};

/// Combined network behaviour for the overlay node.
#[derive(NetworkBehaviour)]
pub struct OverlayBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
    pub mdns: mdns::tokio::Behaviour,
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub limits: connection_limits::Behaviour,
}

impl OverlayBehaviour {
    pub fn new(
        key: &Keypair,
        config: &NodeConfig,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let local_peer_id = key.public().to_peer_id();

        let gossip_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(config.gossip_heartbeat)
            .validation_mode(gossipsub::ValidationMode::Strict)
            .build()
            .map_err(|e| e.to_string())?;
        let gossipsub = gossipsub::Behaviour::new(
            gossipsub::MessageAuthenticity::Signed(key.clone()),
            gossip_config,
        )
        .map_err(|e| e.to_string())?;

        let identify = identify::Behaviour::new(identify::Config::new(
            PROTOCOL_VERSION.to_string(),
            key.public(),
        ));

        let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)?;

        // Speaks the public IPFS DHT protocol so rendezvous works across the
        // default bootstrap network.
        let store = kad::store::MemoryStore::new(local_peer_id);
        let mut kad_config = kad::Config::new(kad::PROTOCOL_NAME);
        kad_config.set_query_timeout(config.kademlia_query_timeout);

        let mut kademlia = kad::Behaviour::with_config(local_peer_id, store, kad_config);
        kademlia.set_mode(Some(kad::Mode::Server));

        let limits = connection_limits::Behaviour::new(
            connection_limits::ConnectionLimits::default()
                .with_max_established(Some(config.max_connections)),
        );

        Ok(Self {
            gossipsub,
            identify,
            mdns,
            kademlia,
            limits,
        })
    }
}

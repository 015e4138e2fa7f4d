//! P2P Network Module
//!
//! - `transport`: async traits the protocol and discovery layers are written against
//! - `swarm`: libp2p swarm, its event loop and the handle implementing the traits
//! - `behaviour`: libp2p NetworkBehaviour configuration
//! - `discovery`: bootstrap, local-network and DHT rendezvous peer discovery
//! - `types`: peer records and the peer book
//! - `config`: node configuration

pub mod behaviour;
pub mod config;
pub mod discovery;
pub mod swarm;
pub mod transport;
pub mod types;

pub use behaviour::OverlayBehaviour;
pub use config::NodeConfig;
pub use discovery::{BootstrapReport, DiscoveryConfig, DiscoveryCoordinator, RendezvousReport};
pub use swarm::{build_network, Network, SwarmHandle};
pub use transport::{Announcements, Delivery, Host, Rendezvous, Subscription, Topic, TransportError};
pub use types::{PeerBook, PeerRecord};

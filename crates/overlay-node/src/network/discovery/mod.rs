//! Peer Discovery
//!
//! Merges three independent peer sources into connection attempts:
//! 1. Bootstrap: connect to a static list of peers at startup
//! 2. Local: connect to peers announced over mDNS
//! 3. Rendezvous: advertise and look up peers under a shared DHT identifier

mod coordinator;
mod rendezvous;

pub use coordinator::{BootstrapReport, DiscoveryConfig, DiscoveryCoordinator};
pub use rendezvous::RendezvousReport;

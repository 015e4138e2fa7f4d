//! Peer Information Types

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use thiserror::Error;

/// A peer identity plus the addresses it can be reached on.
///
/// Produced by the bootstrap list, local announcements and DHT lookups alike.
/// An empty address list means "let the transport resolve addresses".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl PeerRecord {
    pub fn new(peer_id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { peer_id, addrs }
    }

    /// Record with no known addresses.
    pub fn from_peer_id(peer_id: PeerId) -> Self {
        Self::new(peer_id, Vec::new())
    }

    /// Parse an address ending in `/p2p/<peer id>`.
    pub fn from_p2p_addr(addr: &Multiaddr) -> Result<Self, PeerAddrError> {
        let mut transport_addr = addr.clone();
        match transport_addr.pop() {
            Some(Protocol::P2p(peer_id)) => {
                let addrs = if transport_addr.is_empty() {
                    Vec::new()
                } else {
                    vec![transport_addr]
                };
                Ok(Self::new(peer_id, addrs))
            }
            _ => Err(PeerAddrError::MissingPeerId(addr.clone())),
        }
    }
}

/// Where a peer record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSource {
    Bootstrap,
    Local,
    Rendezvous,
}

impl PeerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerSource::Bootstrap => "bootstrap",
            PeerSource::Local => "mdns",
            PeerSource::Rendezvous => "rendezvous",
        }
    }
}

#[derive(Error, Debug)]
pub enum PeerAddrError {
    #[error("Address has no /p2p/ peer id component: {0}")]
    MissingPeerId(Multiaddr),
}

/// Last six characters of the base58 peer id, for log lines.
pub fn short_id(peer_id: &PeerId) -> String {
    let encoded = peer_id.to_base58();
    encoded[encoded.len().saturating_sub(6)..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_p2p_addr_splits_identity() {
        let peer_id = PeerId::random();
        let addr: Multiaddr = format!("/ip4/10.0.0.1/tcp/4001/p2p/{peer_id}").parse().unwrap();

        let record = PeerRecord::from_p2p_addr(&addr).unwrap();
        assert_eq!(record.peer_id, peer_id);
        assert_eq!(record.addrs, vec!["/ip4/10.0.0.1/tcp/4001".parse::<Multiaddr>().unwrap()]);
    }

    #[test]
    fn test_from_p2p_addr_identity_only() {
        let peer_id = PeerId::random();
        let addr: Multiaddr = format!("/p2p/{peer_id}").parse().unwrap();

        let record = PeerRecord::from_p2p_addr(&addr).unwrap();
        assert_eq!(record, PeerRecord::from_peer_id(peer_id));
    }

    #[test]
    fn test_from_p2p_addr_requires_identity() {
        let addr: Multiaddr = "/ip4/10.0.0.1/tcp/4001".parse().unwrap();
        assert!(matches!(
            PeerRecord::from_p2p_addr(&addr),
            Err(PeerAddrError::MissingPeerId(_))
        ));
    }

    #[test]
    fn test_short_id() {
        let peer_id = PeerId::random();
        let short = short_id(&peer_id);
        assert_eq!(short.len(), 6);
        assert!(peer_id.to_base58().ends_with(&short));
    }
}

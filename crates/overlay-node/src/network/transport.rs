//! Transport Interfaces
//!
//! Narrow async traits over the peer-to-peer substrate. The protocol dispatcher
//! and discovery coordinator only ever see these, so they can run against the
//! libp2p swarm handle in production and in-memory fakes in tests.

use super::types::PeerRecord;
use async_trait::async_trait;
use libp2p::PeerId;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Dialing a peer failed.
    #[error("Dial failed: {0}")]
    Dial(String),

    /// Broadcasting on the topic failed.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// A DHT query or advertisement failed.
    #[error("Query failed: {0}")]
    Query(String),

    /// Operation did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The substrate has shut down.
    #[error("Transport closed")]
    Closed,
}

/// A broadcast message as delivered by the pubsub substrate.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub data: Vec<u8>,
    /// Peer the message was received from.
    pub source: PeerId,
}

/// Connection establishment against the local host.
#[async_trait]
pub trait Host: Send + Sync {
    fn local_peer_id(&self) -> PeerId;

    /// Connect to a peer. Succeeds immediately if already connected.
    async fn connect(&self, peer: &PeerRecord) -> Result<(), TransportError>;
}

/// Broadcast side of the control topic.
#[async_trait]
pub trait Topic: Send + Sync {
    async fn publish(&self, data: Vec<u8>) -> Result<(), TransportError>;
}

/// Receive side of the control topic.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. [`TransportError::Closed`] is terminal.
    async fn next(&mut self) -> Result<Delivery, TransportError>;

    /// Leave the topic. Called once when the consumer stops.
    async fn release(&mut self) {}
}

/// DHT-backed presence advertisement and lookup.
#[async_trait]
pub trait Rendezvous: Send + Sync {
    async fn advertise(&self, namespace: &str) -> Result<(), TransportError>;

    async fn find_peers(&self, namespace: &str) -> Result<Vec<PeerRecord>, TransportError>;
}

/// Stream of peers announced on the local network.
#[async_trait]
pub trait Announcements: Send {
    /// Next announced peer, or `None` once announcements stop for good.
    async fn next_peer(&mut self) -> Option<PeerRecord>;
}

#[async_trait]
impl Announcements for mpsc::UnboundedReceiver<PeerRecord> {
    async fn next_peer(&mut self) -> Option<PeerRecord> {
        self.recv().await
    }
}

#[async_trait]
impl Announcements for mpsc::Receiver<PeerRecord> {
    async fn next_peer(&mut self) -> Option<PeerRecord> {
        self.recv().await
    }
}

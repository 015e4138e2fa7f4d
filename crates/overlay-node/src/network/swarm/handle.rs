//! Swarm Handle
//!
//! Cloneable front end to the swarm event loop. Every call becomes a
//! [`SwarmCommand`] carrying a oneshot reply channel.

use super::super::transport::{Delivery, Host, Rendezvous, Subscription, Topic, TransportError};
use super::super::types::PeerRecord;
use super::pending::Reply;
use async_trait::async_trait;
use libp2p::PeerId;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Commands handled by the swarm event loop
#[derive(Debug)]
pub enum SwarmCommand {
    /// Dial a peer; replies once the connection is up or has failed
    Dial { peer: PeerRecord, reply: Reply<()> },
    /// Publish on the control topic
    Publish { data: Vec<u8>, reply: Reply<()> },
    /// Leave the control topic
    Unsubscribe,
    /// Start providing the rendezvous key; replies once the record is stored locally
    StartProviding { namespace: String, reply: Reply<()> },
    /// Look up providers of the rendezvous key
    GetProviders {
        namespace: String,
        reply: Reply<Vec<PeerRecord>>,
    },
}

#[derive(Clone)]
pub struct SwarmHandle {
    local_peer_id: PeerId,
    commands: mpsc::UnboundedSender<SwarmCommand>,
}

impl SwarmHandle {
    pub(super) fn new(local_peer_id: PeerId, commands: mpsc::UnboundedSender<SwarmCommand>) -> Self {
        Self {
            local_peer_id,
            commands,
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> SwarmCommand,
    ) -> Result<T, TransportError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| TransportError::Closed)?;
        response.await.map_err(|_| TransportError::Closed)?
    }
}

#[async_trait]
impl Host for SwarmHandle {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    async fn connect(&self, peer: &PeerRecord) -> Result<(), TransportError> {
        let peer = peer.clone();
        self.request(|reply| SwarmCommand::Dial { peer, reply }).await
    }
}

#[async_trait]
impl Topic for SwarmHandle {
    async fn publish(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.request(|reply| SwarmCommand::Publish { data, reply }).await
    }
}

#[async_trait]
impl Rendezvous for SwarmHandle {
    async fn advertise(&self, namespace: &str) -> Result<(), TransportError> {
        let namespace = namespace.to_string();
        self.request(|reply| SwarmCommand::StartProviding { namespace, reply })
            .await
    }

    async fn find_peers(&self, namespace: &str) -> Result<Vec<PeerRecord>, TransportError> {
        let namespace = namespace.to_string();
        self.request(|reply| SwarmCommand::GetProviders { namespace, reply })
            .await
    }
}

/// Deliveries from the control topic, fed by the event loop.
pub struct GossipSubscription {
    deliveries: mpsc::Receiver<Delivery>,
    handle: SwarmHandle,
}

impl GossipSubscription {
    pub(super) fn new(deliveries: mpsc::Receiver<Delivery>, handle: SwarmHandle) -> Self {
        Self { deliveries, handle }
    }
}

#[async_trait]
impl Subscription for GossipSubscription {
    async fn next(&mut self) -> Result<Delivery, TransportError> {
        self.deliveries.recv().await.ok_or(TransportError::Closed)
    }

    async fn release(&mut self) {
        self.deliveries.close();
        if self.handle.commands.send(SwarmCommand::Unsubscribe).is_err() {
            debug!("Swarm already stopped, nothing to unsubscribe from");
        }
    }
}

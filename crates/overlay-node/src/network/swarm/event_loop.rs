//! Swarm Event Loop
//!
//! Sole owner of the swarm. Handles libp2p swarm events (connections, gossipsub
//! deliveries, mDNS announcements, identify and Kademlia) and the commands sent
//! through [`super::SwarmHandle`].

use super::super::behaviour::{OverlayBehaviour, OverlayBehaviourEvent};
use super::super::transport::{Delivery, TransportError};
use super::super::types::{short_id, PeerRecord};
use super::handle::SwarmCommand;
use super::pending::{PendingDials, PendingLookups, Reply};
use futures::StreamExt;
use libp2p::swarm::dial_opts::{DialOpts, PeerCondition};
use libp2p::swarm::SwarmEvent;
use libp2p::{gossipsub, identify, kad, mdns, Multiaddr, PeerId, Swarm};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub struct EventLoop {
    swarm: Swarm<OverlayBehaviour>,
    topic: gossipsub::IdentTopic,
    commands: mpsc::UnboundedReceiver<SwarmCommand>,
    deliveries: mpsc::Sender<Delivery>,
    announcements: mpsc::UnboundedSender<PeerRecord>,
    pending_dials: PendingDials,
    pending_lookups: PendingLookups,
}

impl EventLoop {
    pub(super) fn new(
        swarm: Swarm<OverlayBehaviour>,
        topic: gossipsub::IdentTopic,
        commands: mpsc::UnboundedReceiver<SwarmCommand>,
        deliveries: mpsc::Sender<Delivery>,
        announcements: mpsc::UnboundedSender<PeerRecord>,
    ) -> Self {
        Self {
            swarm,
            topic,
            commands,
            deliveries,
            announcements,
            pending_dials: PendingDials::default(),
            pending_lookups: PendingLookups::default(),
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Drive the swarm until cancelled or every handle is dropped. Dropping the
    /// loop closes the subscription and fails outstanding requests with
    /// [`TransportError::Closed`].
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All swarm handles dropped");
                        break;
                    }
                },
            }
        }
        info!(
            pending_dials = self.pending_dials.len(),
            pending_lookups = self.pending_lookups.len(),
            "Swarm event loop stopped"
        );
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<OverlayBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                let local_peer_id = *self.swarm.local_peer_id();
                info!(address = %format!("{address}/p2p/{local_peer_id}"), "Connect to me on");
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                num_established,
                ..
            } => {
                debug!(
                    peer_id_short = %short_id(&peer_id),
                    remote_addr = %endpoint.get_remote_address(),
                    connections = num_established.get(),
                    "Peer connected"
                );
                self.record_connected_peers();
                self.pending_dials.resolve(connection_id, Ok(()));
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                debug!(
                    peer_id_short = %short_id(&peer_id),
                    cause = ?cause,
                    "Peer disconnected"
                );
                self.record_connected_peers();
            }
            SwarmEvent::OutgoingConnectionError {
                connection_id,
                peer_id,
                error,
                ..
            } => {
                trace!(
                    peer_id_short = %peer_id.as_ref().map(short_id).unwrap_or_default(),
                    error = %error,
                    "Outgoing connection failed"
                );
                self.pending_dials
                    .resolve(connection_id, Err(TransportError::Dial(error.to_string())));
            }
            SwarmEvent::IncomingConnectionError { error, .. } => {
                trace!(error = %error, "Incoming connection failed");
            }
            SwarmEvent::Behaviour(OverlayBehaviourEvent::Gossipsub(event)) => {
                self.handle_gossipsub_event(event);
            }
            SwarmEvent::Behaviour(OverlayBehaviourEvent::Mdns(mdns::Event::Discovered(found))) => {
                self.announce_local_peers(found);
            }
            SwarmEvent::Behaviour(OverlayBehaviourEvent::Mdns(mdns::Event::Expired(expired))) => {
                for (peer_id, addr) in expired {
                    trace!(peer_id_short = %short_id(&peer_id), addr = %addr, "mDNS: peer expired");
                }
            }
            SwarmEvent::Behaviour(OverlayBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                trace!(
                    peer_id_short = %short_id(&peer_id),
                    protocol_version = %info.protocol_version,
                    listen_addrs = info.listen_addrs.len(),
                    "Identify: received peer info"
                );
                for addr in info.listen_addrs {
                    self.swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
                }
            }
            SwarmEvent::Behaviour(OverlayBehaviourEvent::Identify(event)) => {
                trace!(event = ?event, "Identify event");
            }
            SwarmEvent::Behaviour(OverlayBehaviourEvent::Kademlia(
                kad::Event::OutboundQueryProgressed { id, result, step, .. },
            )) => {
                self.handle_query_progress(id, result, step.last);
            }
            SwarmEvent::Behaviour(OverlayBehaviourEvent::Kademlia(event)) => {
                trace!(event = ?event, "Kademlia: DHT event");
            }
            _ => {}
        }
    }

    fn handle_gossipsub_event(&mut self, event: gossipsub::Event) {
        match event {
            gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            } => {
                let delivery = Delivery {
                    source: message.source.unwrap_or(propagation_source),
                    data: message.data,
                };
                match self.deliveries.try_send(delivery) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("Inbound queue full, dropping control message");
                        metrics::counter!("overlay_inbound_dropped_total").increment(1);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        trace!("Subscription released, discarding control message");
                    }
                }
            }
            gossipsub::Event::Subscribed { peer_id, topic } => {
                debug!(peer_id_short = %short_id(&peer_id), topic = %topic, "Peer joined topic");
            }
            gossipsub::Event::Unsubscribed { peer_id, topic } => {
                debug!(peer_id_short = %short_id(&peer_id), topic = %topic, "Peer left topic");
            }
            other => trace!(event = ?other, "Gossipsub event"),
        }
    }

    /// Group mDNS results per peer and hand them to local discovery.
    fn announce_local_peers(&mut self, found: Vec<(PeerId, Multiaddr)>) {
        let mut grouped: HashMap<PeerId, Vec<Multiaddr>> = HashMap::new();
        for (peer_id, addr) in found {
            self.swarm
                .behaviour_mut()
                .kademlia
                .add_address(&peer_id, addr.clone());
            grouped.entry(peer_id).or_default().push(addr);
        }

        for (peer_id, addrs) in grouped {
            trace!(peer_id_short = %short_id(&peer_id), addrs = addrs.len(), "mDNS: discovered peer");
            if self.announcements.send(PeerRecord::new(peer_id, addrs)).is_err() {
                trace!("Local discovery stopped, dropping announcement");
            }
        }
    }

    fn handle_command(&mut self, command: SwarmCommand) {
        match command {
            SwarmCommand::Dial { peer, reply } => self.dial(peer, reply),
            SwarmCommand::Publish { data, reply } => {
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(self.topic.clone(), data)
                    .map(|_| ())
                    .map_err(|e| TransportError::Publish(e.to_string()));
                let _ = reply.send(result);
            }
            SwarmCommand::Unsubscribe => {
                if self.swarm.behaviour_mut().gossipsub.unsubscribe(&self.topic) {
                    info!(topic = %self.topic, "Left control topic");
                }
            }
            SwarmCommand::StartProviding { namespace, reply } => {
                // The record is stored locally right away; publication to the
                // closest peers continues in the background.
                let key = kad::RecordKey::new(&namespace);
                let result = self
                    .swarm
                    .behaviour_mut()
                    .kademlia
                    .start_providing(key)
                    .map(|_| ())
                    .map_err(|e| TransportError::Query(e.to_string()));
                let _ = reply.send(result);
            }
            SwarmCommand::GetProviders { namespace, reply } => {
                let key = kad::RecordKey::new(&namespace);
                let query_id = self.swarm.behaviour_mut().kademlia.get_providers(key);
                self.pending_lookups.start(query_id, reply);
            }
        }
    }

    fn dial(&mut self, peer: PeerRecord, reply: Reply<()>) {
        let opts = if peer.addrs.is_empty() {
            DialOpts::peer_id(peer.peer_id)
                .condition(PeerCondition::Disconnected)
                .build()
        } else {
            for addr in &peer.addrs {
                self.swarm
                    .behaviour_mut()
                    .kademlia
                    .add_address(&peer.peer_id, addr.clone());
            }
            DialOpts::peer_id(peer.peer_id)
                .addresses(peer.addrs)
                .extend_addresses_through_behaviour()
                .condition(PeerCondition::Disconnected)
                .build()
        };
        let connection_id = opts.connection_id();
        let dialed = self.swarm.dial(opts);
        self.pending_dials.start(connection_id, dialed, reply);
    }

    fn handle_query_progress(&mut self, id: kad::QueryId, result: kad::QueryResult, last: bool) {
        match result {
            kad::QueryResult::GetProviders(result) => {
                self.pending_lookups.progress(id, result, last);
            }
            kad::QueryResult::StartProviding(Ok(ok)) => {
                debug!(key = ?ok.key, "Provider record published");
            }
            kad::QueryResult::StartProviding(Err(e)) => {
                debug!(error = %e, "Provider record publication incomplete");
            }
            kad::QueryResult::Bootstrap(Ok(ok)) => {
                trace!(remaining = ok.num_remaining, "DHT bootstrap progressed");
            }
            kad::QueryResult::Bootstrap(Err(e)) => {
                debug!(error = %e, "DHT bootstrap failed");
            }
            other => trace!(result = ?other, "Kademlia: query progressed"),
        }
    }

    fn record_connected_peers(&self) {
        metrics::gauge!("overlay_connected_peers").set(self.swarm.connected_peers().count() as f64);
    }
}


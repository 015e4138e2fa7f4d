//! Protocol Dispatcher
//!
//! Pulls deliveries from the control topic subscription one at a time, decodes
//! them, drops our own broadcasts and hands each message to a handler task.
//! Handlers run concurrently and unordered; the receive loop never waits on
//! them except when the in-flight limit is reached.

use super::builder::{parse_peer_list, MessageBuilder, MAX_PEER_LIST_LEN};
use super::message::{decode, Message, Op};
use crate::network::transport::{Delivery, Subscription, Topic, TransportError};
use crate::network::types::{short_id, PeerBook};
use libp2p::PeerId;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Maximum number of handlers running at once
    pub max_in_flight_handlers: usize,
    /// Reply to GetVersion and GetPeerList queries
    pub answer_queries: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_in_flight_handlers: 256,
            answer_queries: false,
        }
    }
}

/// Receives, filters and dispatches control messages.
///
/// Constructing a server does nothing on its own; [`ProtocolServer::run`]
/// consumes it and keeps pulling until the token is cancelled or the
/// subscription closes.
pub struct ProtocolServer {
    local_peer_id: PeerId,
    handlers: Arc<Handlers>,
    config: ProtocolConfig,
}

struct Handlers {
    local_peer_id: PeerId,
    topic: Arc<dyn Topic>,
    builder: Arc<MessageBuilder>,
    peers: PeerBook,
    answer_queries: bool,
}

impl ProtocolServer {
    pub fn new(
        local_peer_id: PeerId,
        topic: Arc<dyn Topic>,
        builder: Arc<MessageBuilder>,
        peers: PeerBook,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            local_peer_id,
            handlers: Arc::new(Handlers {
                local_peer_id,
                topic,
                builder,
                peers,
                answer_queries: config.answer_queries,
            }),
            config,
        }
    }

    /// Spawn [`ProtocolServer::run`] on the runtime.
    pub fn spawn<S>(self, subscription: S, cancel: CancellationToken) -> tokio::task::JoinHandle<()>
    where
        S: Subscription + 'static,
    {
        tokio::spawn(self.run(subscription, cancel))
    }

    /// Run the receive loop. Returns after the subscription is released and all
    /// in-flight handlers have finished.
    pub async fn run<S: Subscription>(self, mut subscription: S, cancel: CancellationToken) {
        info!(
            peer_id_short = %short_id(&self.local_peer_id),
            max_in_flight = self.config.max_in_flight_handlers,
            "Protocol dispatcher started"
        );

        let limiter = Arc::new(Semaphore::new(self.config.max_in_flight_handlers.max(1)));
        let tracker = TaskTracker::new();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = subscription.next() => next,
            };

            let delivery = match next {
                Ok(delivery) => delivery,
                Err(TransportError::Closed) => {
                    info!("Subscription closed, stopping dispatcher");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to receive delivery");
                    continue;
                }
            };
            metrics::counter!("overlay_messages_received_total").increment(1);

            let Some(message) = self.accept(delivery) else {
                continue;
            };

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = limiter.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let handlers = self.handlers.clone();
            tracker.spawn(async move {
                handlers.dispatch(message).await;
                drop(permit);
            });
        }

        subscription.release().await;
        tracker.close();
        tracker.wait().await;
        info!("Protocol dispatcher stopped");
    }

    /// Decode a delivery and attribute its sender. Returns `None` for
    /// malformed bytes and for our own broadcasts.
    fn accept(&self, delivery: Delivery) -> Option<Message> {
        let mut message = match decode(&delivery.data) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    peer_id_short = %short_id(&delivery.source),
                    len = delivery.data.len(),
                    error = %e,
                    "Dropping undecodable message"
                );
                metrics::counter!("overlay_decode_failures_total").increment(1);
                return None;
            }
        };

        if delivery.source == self.local_peer_id {
            trace!(op = %message.op, "Ignoring own broadcast");
            return None;
        }

        message.sender = Some(delivery.source);
        Some(message)
    }
}

impl Handlers {
    async fn dispatch(&self, message: Message) {
        let Some(sender) = message.sender else {
            return;
        };
        debug!(op = %message.op, peer_id_short = %short_id(&sender), "Dispatching message");

        match message.op {
            Op::Ping => {
                self.peers.observe(sender).await;
                self.broadcast(Op::Pong, self.builder.pong()).await;
            }
            Op::Pong => {
                self.peers.record_pong(sender).await;
            }
            Op::GetVersion => {
                self.peers.observe(sender).await;
                if self.answer_queries {
                    self.broadcast(Op::Version, self.builder.version_message()).await;
                }
            }
            Op::Version => {
                let version = String::from_utf8_lossy(message.payload()).into_owned();
                self.peers.record_version(sender, version).await;
            }
            Op::GetPeerList => {
                self.peers.observe(sender).await;
                if self.answer_queries {
                    let snapshot: Vec<PeerId> = self
                        .peers
                        .snapshot()
                        .await
                        .into_iter()
                        .filter(|peer_id| *peer_id != sender && *peer_id != self.local_peer_id)
                        .collect();
                    self.broadcast(Op::PeerList, self.builder.peer_list(&snapshot)).await;
                }
            }
            Op::PeerList => {
                self.peers.observe(sender).await;
                match parse_peer_list(message.payload()) {
                    Ok(listed) => {
                        // Only third parties, and no more than we would list ourselves.
                        let listed = listed
                            .into_iter()
                            .filter(|peer_id| *peer_id != self.local_peer_id && *peer_id != sender)
                            .take(MAX_PEER_LIST_LEN);
                        let added = self.peers.record_gossiped(listed).await;
                        trace!(added = added, "Merged peer list");
                    }
                    Err(e) => {
                        debug!(peer_id_short = %short_id(&sender), error = %e, "Invalid peer list payload");
                    }
                }
            }
            Op::Undefined | Op::Unknown(_) => {
                warn!(
                    op = u8::from(message.op),
                    peer_id_short = %short_id(&sender),
                    "Unrecognized operation"
                );
                return;
            }
        }
        metrics::counter!("overlay_messages_dispatched_total", "op" => message.op.as_str())
            .increment(1);
    }

    async fn broadcast(&self, op: Op, bytes: Vec<u8>) {
        if let Err(e) = self.topic.publish(bytes).await {
            warn!(op = %op, error = %e, "Failed to broadcast reply");
            metrics::counter!("overlay_publish_failures_total").increment(1);
        }
    }
}

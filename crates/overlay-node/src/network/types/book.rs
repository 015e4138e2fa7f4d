//! Peer Book
//!
//! Tracks peers heard from on the control topic: when they were last seen, when
//! they last answered a ping, and which version they announced.

use super::peer::short_id;
use libp2p::PeerId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// How the book learned about a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOrigin {
    /// The peer sent us a message directly.
    Direct,
    /// Another peer listed it in a `PeerList`.
    Gossiped,
}

#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub peer_id: PeerId,
    pub origin: PeerOrigin,
    pub version: Option<String>,
    pub last_seen: Instant,
    pub last_pong: Option<Instant>,
}

impl PeerEntry {
    fn new(peer_id: PeerId, origin: PeerOrigin) -> Self {
        let now = Instant::now();
        Self {
            peer_id,
            origin,
            version: None,
            last_seen: now,
            last_pong: None,
        }
    }

    fn touch(&mut self) {
        self.origin = PeerOrigin::Direct;
        self.last_seen = Instant::now();
    }
}

/// Shared registry of protocol-level peers
#[derive(Clone, Default)]
pub struct PeerBook {
    peers: Arc<RwLock<HashMap<PeerId, PeerEntry>>>,
}

impl PeerBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a peer as heard from directly.
    pub async fn observe(&self, peer_id: PeerId) {
        let mut peers = self.peers.write().await;
        peers
            .entry(peer_id)
            .or_insert_with(|| {
                debug!(peer_id_short = %short_id(&peer_id), "Adding peer to peer book");
                PeerEntry::new(peer_id, PeerOrigin::Direct)
            })
            .touch();
        metrics::gauge!("overlay_known_peers").set(peers.len() as f64);
    }

    pub async fn record_pong(&self, peer_id: PeerId) {
        self.observe(peer_id).await;
        if let Some(entry) = self.peers.write().await.get_mut(&peer_id) {
            entry.last_pong = Some(Instant::now());
        }
    }

    pub async fn record_version(&self, peer_id: PeerId, version: String) {
        self.observe(peer_id).await;
        if let Some(entry) = self.peers.write().await.get_mut(&peer_id) {
            trace!(peer_id_short = %short_id(&peer_id), version = %version, "Recorded peer version");
            entry.version = Some(version);
        }
    }

    /// Add peers listed by someone else. Existing entries are left untouched.
    /// Returns how many peers were new.
    pub async fn record_gossiped(&self, peer_ids: impl IntoIterator<Item = PeerId>) -> usize {
        let mut peers = self.peers.write().await;
        let mut added = 0;
        for peer_id in peer_ids {
            if let std::collections::hash_map::Entry::Vacant(e) = peers.entry(peer_id) {
                e.insert(PeerEntry::new(peer_id, PeerOrigin::Gossiped));
                added += 1;
            }
        }
        metrics::gauge!("overlay_known_peers").set(peers.len() as f64);
        added
    }

    pub async fn get(&self, peer_id: &PeerId) -> Option<PeerEntry> {
        self.peers.read().await.get(peer_id).cloned()
    }

    pub async fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.read().await.contains_key(peer_id)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Peer ids ordered by most recently seen first.
    pub async fn snapshot(&self) -> Vec<PeerId> {
        let peers = self.peers.read().await;
        let mut entries: Vec<&PeerEntry> = peers.values().collect();
        entries.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        entries.into_iter().map(|entry| entry.peer_id).collect()
    }

    /// Remove peers not seen within `max_age`.
    /// Called periodically to prevent unbounded growth from departed peers.
    pub async fn cleanup_stale_peers(&self, max_age: Duration) -> usize {
        let mut peers = self.peers.write().await;
        let before = peers.len();
        peers.retain(|peer_id, entry| {
            let keep = entry.last_seen.elapsed() <= max_age;
            if !keep {
                trace!(peer_id_short = %short_id(peer_id), "Cleaning up stale peer");
            }
            keep
        });
        metrics::gauge!("overlay_known_peers").set(peers.len() as f64);
        before - peers.len()
    }
}

/// Spawns a background task to periodically drop stale peers from the book
pub fn spawn_cleanup_loop(
    book: PeerBook,
    interval: Duration,
    max_age: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let removed = book.cleanup_stale_peers(max_age).await;
                    if removed > 0 {
                        debug!(removed = removed, "Removed stale peers from peer book");
                    }
                }
            }
        }
    })
}

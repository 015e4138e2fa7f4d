//! Discovery Coordinator
//!
//! Owns the bootstrap and local-announcement strategies and the shared
//! connection step. Rendezvous rounds live in `rendezvous.rs`.

use super::rendezvous::RendezvousReport;
use crate::network::transport::{Announcements, Host, Rendezvous, TransportError};
use crate::network::types::{short_id, PeerRecord, PeerSource};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Discovery settings
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Identifier peers advertise and look each other up under
    pub rendezvous_namespace: String,
    /// Number of rendezvous rounds before giving up
    pub rendezvous_rounds: u32,
    /// Delay before each rendezvous round
    pub rendezvous_interval: Duration,
    /// Re-advertise after this many rounds, so the provider record reaches
    /// peers that joined the routing table later
    pub readvertise_rounds: u32,
    /// Upper bound on a single connection attempt
    pub connect_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            rendezvous_namespace: "overlay-rendezvous/0.0.1".to_string(),
            rendezvous_rounds: 90,
            rendezvous_interval: Duration::from_secs(1),
            readvertise_rounds: 10,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of the bootstrap fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub attempted: usize,
    pub connected: usize,
    pub failed: usize,
}

/// Drives connection attempts from every peer source.
#[derive(Clone)]
pub struct DiscoveryCoordinator {
    pub(super) host: Arc<dyn Host>,
    pub(super) rendezvous: Arc<dyn Rendezvous>,
    pub(super) config: DiscoveryConfig,
}

impl DiscoveryCoordinator {
    pub fn new(host: Arc<dyn Host>, rendezvous: Arc<dyn Rendezvous>, config: DiscoveryConfig) -> Self {
        Self {
            host,
            rendezvous,
            config,
        }
    }

    /// Connect to every bootstrap peer in parallel and wait until each attempt
    /// has either succeeded, failed or timed out.
    pub async fn connect_bootstrap(&self, peers: &[PeerRecord]) -> BootstrapReport {
        let mut report = BootstrapReport {
            attempted: peers.len(),
            ..Default::default()
        };
        if peers.is_empty() {
            debug!("No bootstrap peers configured");
            return report;
        }

        info!(peer_count = peers.len(), "Connecting to bootstrap peers");

        let mut attempts = JoinSet::new();
        for peer in peers.iter().cloned() {
            let coordinator = self.clone();
            attempts.spawn(async move { coordinator.connect(&peer, PeerSource::Bootstrap).await });
        }

        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok(Ok(())) => report.connected += 1,
                Ok(Err(_)) => report.failed += 1,
                Err(e) => {
                    warn!(error = %e, "Bootstrap connection task failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            connected = report.connected,
            failed = report.failed,
            "Bootstrap complete"
        );
        report
    }

    /// Startup order: bootstrap connections first, then rendezvous rounds in
    /// the background, then `announce` once `announce_delay` has passed.
    /// Waits for the rendezvous rounds to end. Returns `None` when cancelled
    /// before bootstrap finished.
    pub async fn run_startup<F>(
        &self,
        bootstrap: &[PeerRecord],
        announce_delay: Duration,
        announce: F,
        cancel: CancellationToken,
    ) -> Option<RendezvousReport>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = self.connect_bootstrap(bootstrap) => {}
        }

        let rendezvous = self.spawn_rendezvous(cancel.clone());
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(announce_delay) => announce.await,
        }

        match rendezvous.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Rendezvous task failed");
                None
            }
        }
    }

    /// Connect to every peer announced on the local network until the
    /// announcements end or the token is cancelled. Returns the number of
    /// announcements handled.
    pub fn spawn_local_discovery<A>(
        &self,
        mut announcements: A,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<usize>
    where
        A: Announcements + 'static,
    {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let local_peer_id = coordinator.host.local_peer_id();
            let attempts = TaskTracker::new();
            let mut handled = 0;

            loop {
                let peer = tokio::select! {
                    _ = cancel.cancelled() => break,
                    peer = announcements.next_peer() => peer,
                };
                let Some(peer) = peer else {
                    debug!("Local announcements ended");
                    break;
                };
                if peer.peer_id == local_peer_id {
                    continue;
                }

                handled += 1;
                info!(
                    peer_id_short = %short_id(&peer.peer_id),
                    addrs = peer.addrs.len(),
                    "Discovered new peer on local network"
                );

                let coordinator = coordinator.clone();
                attempts.spawn(async move {
                    let _ = coordinator.connect(&peer, PeerSource::Local).await;
                });
            }

            attempts.close();
            attempts.wait().await;
            handled
        })
    }

    /// One bounded connection attempt. Failures are logged here and returned
    /// for bookkeeping only.
    pub(super) async fn connect(&self, peer: &PeerRecord, source: PeerSource) -> Result<(), TransportError> {
        let timeout = self.config.connect_timeout;
        let result = match tokio::time::timeout(timeout, self.host.connect(peer)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        let outcome = if result.is_ok() { "connected" } else { "failed" };
        metrics::counter!(
            "overlay_connection_attempts_total",
            "source" => source.as_str(),
            "outcome" => outcome
        )
        .increment(1);

        match &result {
            Ok(()) => info!(
                peer_id_short = %short_id(&peer.peer_id),
                source = source.as_str(),
                "Connection established"
            ),
            Err(e) => warn!(
                peer_id_short = %short_id(&peer.peer_id),
                source = source.as_str(),
                error = %e,
                "Connection attempt failed"
            ),
        }
        result
    }
}

//! Rendezvous Discovery
//!
//! Advertises local presence under the rendezvous identifier and polls the DHT
//! for other peers advertising under it, for a bounded number of rounds. Within
//! a round, the first successful connection ends the round. The advertisement
//! is retried until it succeeds and then repeated every `readvertise_rounds`.

use super::coordinator::DiscoveryCoordinator;
use crate::network::types::{short_id, PeerSource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of the rendezvous rounds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RendezvousReport {
    /// Rounds that ran a lookup
    pub rounds: u32,
    /// Rounds that ended in a new connection
    pub connections: u32,
    /// Lookups that failed and were retried in the next round
    pub failed_queries: u32,
    pub cancelled: bool,
}

impl DiscoveryCoordinator {
    /// Run rendezvous discovery as a detached background task.
    pub fn spawn_rendezvous(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<RendezvousReport> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run_rendezvous(cancel).await })
    }

    pub async fn run_rendezvous(&self, cancel: CancellationToken) -> RendezvousReport {
        let namespace = self.config.rendezvous_namespace.as_str();
        let local_peer_id = self.host.local_peer_id();
        let mut report = RendezvousReport::default();
        let readvertise_rounds = self.config.readvertise_rounds.max(1);
        let mut advertised_in: Option<u32> = None;

        info!(
            namespace = %namespace,
            rounds = self.config.rendezvous_rounds,
            "Rendezvous: searching for peers"
        );

        for round in 1..=self.config.rendezvous_rounds {
            if advertised_in.is_none_or(|last| round - last >= readvertise_rounds) {
                match self.rendezvous.advertise(namespace).await {
                    Ok(()) => {
                        debug!(namespace = %namespace, round = round, "Rendezvous: advertised presence");
                        advertised_in = Some(round);
                    }
                    Err(e) => warn!(error = %e, "Rendezvous: advertise failed, will retry"),
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                _ = tokio::time::sleep(self.config.rendezvous_interval) => {}
            }

            report.rounds += 1;
            let lookup = tokio::select! {
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                lookup = self.rendezvous.find_peers(namespace) => lookup,
            };

            let candidates = match lookup {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(round = round, error = %e, "Rendezvous: lookup failed, retrying next round");
                    report.failed_queries += 1;
                    continue;
                }
            };

            for candidate in candidates.iter().filter(|c| c.peer_id != local_peer_id) {
                if self.connect(candidate, PeerSource::Rendezvous).await.is_ok() {
                    info!(
                        round = round,
                        peer_id_short = %short_id(&candidate.peer_id),
                        "Rendezvous: discovered new peer"
                    );
                    report.connections += 1;
                    break;
                }
            }
        }

        info!(
            rounds = report.rounds,
            connections = report.connections,
            failed_queries = report.failed_queries,
            "Rendezvous: peer discovery complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::super::coordinator::tests::{test_config, FakeHost, FakeRendezvous, Reachability};
    use super::super::coordinator::DiscoveryConfig;
    use super::*;
    use crate::network::transport::TransportError;
    use crate::network::types::PeerRecord;
    use libp2p::PeerId;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_configured_number_of_rounds() {
        let host = Arc::new(FakeHost::new([]));
        let rendezvous = Arc::new(FakeRendezvous::default());
        let coordinator = DiscoveryCoordinator::new(host, rendezvous.clone(), test_config());

        let report = coordinator.run_rendezvous(CancellationToken::new()).await;

        assert_eq!(report.rounds, 3);
        assert_eq!(report.connections, 0);
        assert_eq!(rendezvous.queries.load(Ordering::SeqCst), 3);
        assert_eq!(rendezvous.advertised.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_presence_is_advertised_again_periodically() {
        let host = Arc::new(FakeHost::new([]));
        let rendezvous = Arc::new(FakeRendezvous::default());
        let config = DiscoveryConfig {
            rendezvous_rounds: 5,
            readvertise_rounds: 2,
            ..test_config()
        };
        let coordinator = DiscoveryCoordinator::new(host, rendezvous.clone(), config);

        coordinator.run_rendezvous(CancellationToken::new()).await;

        // Rounds 1, 3 and 5.
        assert_eq!(rendezvous.advertised.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_readvertise_interval_counts_from_last_success() {
        let host = Arc::new(FakeHost::new([]));
        let rendezvous = Arc::new(FakeRendezvous::default());
        rendezvous.advertise_failures.store(2, Ordering::SeqCst);
        let config = DiscoveryConfig {
            rendezvous_rounds: 6,
            readvertise_rounds: 3,
            ..test_config()
        };
        let coordinator = DiscoveryCoordinator::new(host, rendezvous.clone(), config);

        coordinator.run_rendezvous(CancellationToken::new()).await;

        // Fails in rounds 1 and 2, succeeds in round 3 and again in round 6.
        assert_eq!(rendezvous.advertised.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_first_success_ends_the_round() {
        let refused = PeerId::random();
        let first = PeerId::random();
        let second = PeerId::random();
        let host = Arc::new(FakeHost::new([
            (first, Reachability::Reachable),
            (second, Reachability::Reachable),
        ]));
        let rendezvous = Arc::new(FakeRendezvous::default());
        rendezvous.lookups.lock().unwrap().push_back(Ok(vec![
            PeerRecord::from_peer_id(host.local),
            PeerRecord::from_peer_id(refused),
            PeerRecord::from_peer_id(first),
            PeerRecord::from_peer_id(second),
        ]));
        let config = DiscoveryConfig {
            rendezvous_rounds: 1,
            ..test_config()
        };
        let coordinator = DiscoveryCoordinator::new(host.clone(), rendezvous, config);

        let report = coordinator.run_rendezvous(CancellationToken::new()).await;

        assert_eq!(report.connections, 1);
        assert_eq!(host.attempts(), vec![refused, first]);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_retried() {
        let peer = PeerId::random();
        let host = Arc::new(FakeHost::new([(peer, Reachability::Reachable)]));
        let rendezvous = Arc::new(FakeRendezvous::default());
        {
            let mut lookups = rendezvous.lookups.lock().unwrap();
            lookups.push_back(Err(TransportError::Query("no known peers".into())));
            lookups.push_back(Ok(vec![PeerRecord::from_peer_id(peer)]));
        }
        rendezvous.advertise_failures.store(1, Ordering::SeqCst);
        let coordinator = DiscoveryCoordinator::new(host.clone(), rendezvous.clone(), test_config());

        let report = coordinator.run_rendezvous(CancellationToken::new()).await;

        assert_eq!(
            report,
            RendezvousReport {
                rounds: 3,
                connections: 1,
                failed_queries: 1,
                cancelled: false,
            }
        );
        assert_eq!(rendezvous.advertised.load(Ordering::SeqCst), 1);
        assert_eq!(host.attempts(), vec![peer]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_rounds() {
        let host = Arc::new(FakeHost::new([]));
        let rendezvous = Arc::new(FakeRendezvous::default());
        let config = DiscoveryConfig {
            rendezvous_rounds: 1000,
            rendezvous_interval: Duration::from_secs(60),
            ..test_config()
        };
        let coordinator = DiscoveryCoordinator::new(host, rendezvous.clone(), config);
        let cancel = CancellationToken::new();
        let handle = coordinator.spawn_rendezvous(cancel.clone());

        cancel.cancel();
        let report = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        assert!(report.cancelled);
        assert_eq!(report.rounds, 0);
        assert_eq!(rendezvous.queries.load(Ordering::SeqCst), 0);
    }
}

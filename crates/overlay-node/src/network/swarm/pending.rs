//! Outstanding Swarm Requests
//!
//! Bookkeeping for requests whose answer arrives later as a swarm event: dials
//! are resolved by the event carrying their `ConnectionId`, provider lookups by
//! the progress steps of their Kademlia query.

use super::super::transport::TransportError;
use super::super::types::PeerRecord;
use libp2p::kad::{GetProvidersError, GetProvidersOk, QueryId};
use libp2p::swarm::{ConnectionId, DialError};
use libp2p::PeerId;
use std::collections::{HashMap, HashSet};
use tokio::sync::oneshot;

pub(super) type Reply<T> = oneshot::Sender<Result<T, TransportError>>;

/// Dials waiting for their connection to be established or to fail.
#[derive(Default)]
pub(super) struct PendingDials {
    waiting: HashMap<ConnectionId, Reply<()>>,
}

impl PendingDials {
    /// Record the outcome of `Swarm::dial`. An existing connection to the peer
    /// answers immediately; any other immediate error fails the request.
    pub fn start(&mut self, connection_id: ConnectionId, dialed: Result<(), DialError>, reply: Reply<()>) {
        match dialed {
            Ok(()) => {
                self.waiting.insert(connection_id, reply);
            }
            Err(DialError::DialPeerConditionFalse(_)) => {
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                let _ = reply.send(Err(TransportError::Dial(e.to_string())));
            }
        }
    }

    /// Answer the dial that opened `connection_id`, if we started it.
    pub fn resolve(&mut self, connection_id: ConnectionId, result: Result<(), TransportError>) {
        if let Some(reply) = self.waiting.remove(&connection_id) {
            let _ = reply.send(result);
        }
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }
}

/// Providers collected so far for one lookup.
#[derive(Debug, Default)]
pub(super) struct ProviderLookup {
    providers: HashSet<PeerId>,
}

impl ProviderLookup {
    /// Fold one progress step. Returns the final answer once the query is
    /// over. A query that fails after finding providers still returns them.
    pub fn step(
        &mut self,
        result: Result<GetProvidersOk, GetProvidersError>,
        last: bool,
    ) -> Option<Result<Vec<PeerRecord>, TransportError>> {
        match result {
            Ok(GetProvidersOk::FoundProviders { providers, .. }) => {
                self.providers.extend(providers);
            }
            Ok(GetProvidersOk::FinishedWithNoAdditionalRecord { .. }) => {}
            Err(e) if self.providers.is_empty() => {
                return Some(Err(TransportError::Query(e.to_string())));
            }
            Err(_) => return Some(Ok(self.records())),
        }
        last.then(|| Ok(self.records()))
    }

    fn records(&mut self) -> Vec<PeerRecord> {
        self.providers.drain().map(PeerRecord::from_peer_id).collect()
    }
}

/// Provider lookups keyed by their Kademlia query.
#[derive(Default)]
pub(super) struct PendingLookups {
    waiting: HashMap<QueryId, (ProviderLookup, Reply<Vec<PeerRecord>>)>,
}

impl PendingLookups {
    pub fn start(&mut self, query_id: QueryId, reply: Reply<Vec<PeerRecord>>) {
        self.waiting.insert(query_id, (ProviderLookup::default(), reply));
    }

    pub fn progress(
        &mut self,
        query_id: QueryId,
        result: Result<GetProvidersOk, GetProvidersError>,
        last: bool,
    ) {
        let Some((lookup, _)) = self.waiting.get_mut(&query_id) else {
            return;
        };
        if let Some(answer) = lookup.step(result, last) {
            if let Some((_, reply)) = self.waiting.remove(&query_id) {
                let _ = reply.send(answer);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::kad::RecordKey;
    use libp2p::swarm::dial_opts::PeerCondition;

    fn found(providers: &[PeerId]) -> Result<GetProvidersOk, GetProvidersError> {
        Ok(GetProvidersOk::FoundProviders {
            key: RecordKey::new(&"ns"),
            providers: providers.iter().copied().collect(),
        })
    }

    fn timed_out() -> Result<GetProvidersOk, GetProvidersError> {
        Err(GetProvidersError::Timeout {
            key: RecordKey::new(&"ns"),
            closest_peers: Vec::new(),
        })
    }

    fn finished() -> Result<GetProvidersOk, GetProvidersError> {
        Ok(GetProvidersOk::FinishedWithNoAdditionalRecord {
            closest_peers: Vec::new(),
        })
    }

    fn peer_ids(records: Vec<PeerRecord>) -> HashSet<PeerId> {
        records.into_iter().map(|r| r.peer_id).collect()
    }

    #[tokio::test]
    async fn test_dial_to_connected_peer_succeeds_immediately() {
        let mut dials = PendingDials::default();
        let (reply, response) = oneshot::channel();

        dials.start(
            ConnectionId::new_unchecked(1),
            Err(DialError::DialPeerConditionFalse(PeerCondition::Disconnected)),
            reply,
        );

        assert_eq!(response.await.unwrap(), Ok(()));
        assert_eq!(dials.len(), 0);
    }

    #[tokio::test]
    async fn test_immediate_dial_error_fails_request() {
        let mut dials = PendingDials::default();
        let (reply, response) = oneshot::channel();

        dials.start(ConnectionId::new_unchecked(1), Err(DialError::Aborted), reply);

        assert!(matches!(response.await.unwrap(), Err(TransportError::Dial(_))));
    }

    #[tokio::test]
    async fn test_dial_is_answered_by_its_own_connection() {
        let mut dials = PendingDials::default();
        let (first_reply, mut first) = oneshot::channel();
        let (second_reply, second) = oneshot::channel();
        dials.start(ConnectionId::new_unchecked(1), Ok(()), first_reply);
        dials.start(ConnectionId::new_unchecked(2), Ok(()), second_reply);

        dials.resolve(ConnectionId::new_unchecked(2), Err(TransportError::Dial("refused".into())));
        dials.resolve(ConnectionId::new_unchecked(7), Ok(()));

        assert_eq!(second.await.unwrap(), Err(TransportError::Dial("refused".into())));
        assert!(first.try_recv().is_err());
        assert_eq!(dials.len(), 1);

        dials.resolve(ConnectionId::new_unchecked(1), Ok(()));
        assert_eq!(first.await.unwrap(), Ok(()));
        assert_eq!(dials.len(), 0);
    }

    #[test]
    fn test_lookup_collects_providers_until_last_step() {
        let (a, b) = (PeerId::random(), PeerId::random());
        let mut lookup = ProviderLookup::default();

        assert!(lookup.step(found(&[a]), false).is_none());
        assert!(lookup.step(found(&[a, b]), false).is_none());
        let answer = lookup.step(finished(), true).unwrap().unwrap();

        assert_eq!(peer_ids(answer), HashSet::from([a, b]));
    }

    #[test]
    fn test_failed_lookup_keeps_found_providers() {
        let a = PeerId::random();
        let mut lookup = ProviderLookup::default();
        lookup.step(found(&[a]), false);

        let answer = lookup.step(timed_out(), true).unwrap().unwrap();
        assert_eq!(peer_ids(answer), HashSet::from([a]));
    }

    #[test]
    fn test_failed_lookup_without_providers_is_an_error() {
        let mut lookup = ProviderLookup::default();
        assert!(matches!(
            lookup.step(timed_out(), false),
            Some(Err(TransportError::Query(_)))
        ));
    }

    #[test]
    fn test_empty_lookup_finishes_with_no_providers() {
        let mut lookup = ProviderLookup::default();
        assert_eq!(lookup.step(finished(), true), Some(Ok(Vec::new())));
    }
}

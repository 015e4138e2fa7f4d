//! Node Configuration
//!
//! Centralized configuration for the overlay node with environment variable
//! overrides. Unparseable overrides are ignored and the default is kept.

use crate::network::discovery::DiscoveryConfig;
use crate::protocol::ProtocolConfig;
use libp2p::Multiaddr;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Public IPFS bootstrap nodes, used when `BOOTSTRAP_PEERS` is not set.
pub const DEFAULT_BOOTSTRAP_PEERS: [&str; 5] = [
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmQCU2EcMqAqQPR2i9bChDtGNJchTbq5TbXJJ16u19uLTa",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmbLHAnMoJPWSCR5Zhtx6BHJX9KiKNN6tpvbUcqanj75Nb",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmcZf59bWwK5XFi76CZX8cbJ4BhTzzA3gU1ZjYZcYW3dwt",
    "/ip4/104.131.131.82/tcp/4001/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
];

/// Node configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct NodeConfig {
    // Transport
    /// Listen addresses (env: LISTEN_ADDRS, comma-separated)
    pub listen_addrs: Vec<Multiaddr>,

    /// Idle connection timeout before closing
    pub connection_idle_timeout: Duration,

    /// Maximum established connections (env: MAX_CONNECTIONS)
    pub max_connections: u32,

    // Pubsub
    /// Control topic name (env: PUBSUB_TOPIC)
    pub pubsub_topic: String,

    /// Gossipsub heartbeat interval
    pub gossip_heartbeat: Duration,

    /// Deliveries buffered between the swarm and the dispatcher
    pub inbound_queue_capacity: usize,

    // Protocol
    /// Maximum concurrently running message handlers (env: MAX_IN_FLIGHT_HANDLERS)
    pub max_in_flight_handlers: usize,

    /// Reply to GetVersion / GetPeerList (env: ANSWER_QUERIES)
    pub answer_queries: bool,

    /// Delay before the startup ping is broadcast
    pub initial_ping_delay: Duration,

    /// Interval for pruning the peer book
    pub cleanup_interval: Duration,

    /// Peers not heard from for this long are pruned
    pub stale_peer_max_age: Duration,

    // Discovery
    /// Bootstrap peers (env: BOOTSTRAP_PEERS, comma-separated /p2p/ multiaddrs)
    pub bootstrap_peers: Vec<Multiaddr>,

    /// Shared DHT rendezvous identifier (env: RENDEZVOUS_NAMESPACE)
    pub rendezvous_namespace: String,

    /// Number of rendezvous rounds (env: RENDEZVOUS_ROUNDS)
    pub rendezvous_rounds: u32,

    /// Delay between rendezvous rounds (env: RENDEZVOUS_INTERVAL_MS)
    pub rendezvous_interval: Duration,

    /// Rounds between repeated advertisements (env: RENDEZVOUS_READVERTISE_ROUNDS)
    pub readvertise_rounds: u32,

    /// Upper bound on one connection attempt (env: CONNECT_TIMEOUT_SECS)
    pub connect_timeout: Duration,

    // Kademlia DHT
    /// Query timeout for Kademlia DHT
    pub kademlia_query_timeout: Duration,

    // Observability
    /// Prometheus listener address (env: METRICS_ADDR, disabled when unset)
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec!["/ip4/0.0.0.0/tcp/0"
                .parse()
                .expect("static listen address is valid")],
            connection_idle_timeout: Duration::from_secs(300),
            max_connections: 400,

            pubsub_topic: "overlay-control/0.0.1".to_string(),
            gossip_heartbeat: Duration::from_secs(1),
            inbound_queue_capacity: 1024,

            max_in_flight_handlers: 256,
            answer_queries: false,
            initial_ping_delay: Duration::from_millis(1314),
            cleanup_interval: Duration::from_secs(60),
            stale_peer_max_age: Duration::from_secs(300),

            bootstrap_peers: parse_addr_list(DEFAULT_BOOTSTRAP_PEERS),
            rendezvous_namespace: "overlay-rendezvous/0.0.1".to_string(),
            rendezvous_rounds: 90,
            rendezvous_interval: Duration::from_secs(1),
            readvertise_rounds: 10,
            connect_timeout: Duration::from_secs(10),

            kademlia_query_timeout: Duration::from_secs(30),

            metrics_addr: None,
        }
    }
}

impl NodeConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addrs) = lookup("LISTEN_ADDRS") {
            let parsed = parse_addr_list(addrs.split(','));
            if !parsed.is_empty() {
                config.listen_addrs = parsed;
            }
        }

        if let Some(topic) = lookup("PUBSUB_TOPIC") {
            config.pubsub_topic = topic;
        }

        if let Some(namespace) = lookup("RENDEZVOUS_NAMESPACE") {
            config.rendezvous_namespace = namespace;
        }

        // An explicitly empty list disables bootstrapping.
        if let Some(peers) = lookup("BOOTSTRAP_PEERS") {
            config.bootstrap_peers = parse_addr_list(peers.split(','));
        }

        if let Some(max) = parsed(&lookup, "MAX_CONNECTIONS") {
            config.max_connections = max;
        }

        if let Some(answer) = parsed(&lookup, "ANSWER_QUERIES") {
            config.answer_queries = answer;
        }

        if let Some(max) = parsed::<usize>(&lookup, "MAX_IN_FLIGHT_HANDLERS") {
            config.max_in_flight_handlers = max.max(1);
        }

        if let Some(rounds) = parsed(&lookup, "RENDEZVOUS_ROUNDS") {
            config.rendezvous_rounds = rounds;
        }

        if let Some(ms) = parsed(&lookup, "RENDEZVOUS_INTERVAL_MS") {
            config.rendezvous_interval = Duration::from_millis(ms);
        }

        if let Some(rounds) = parsed::<u32>(&lookup, "RENDEZVOUS_READVERTISE_ROUNDS") {
            config.readvertise_rounds = rounds.max(1);
        }

        if let Some(secs) = parsed(&lookup, "CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs);
        }

        if let Some(addr) = parsed(&lookup, "METRICS_ADDR") {
            config.metrics_addr = Some(addr);
        }

        config
    }

    pub fn protocol(&self) -> ProtocolConfig {
        ProtocolConfig {
            max_in_flight_handlers: self.max_in_flight_handlers,
            answer_queries: self.answer_queries,
        }
    }

    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            rendezvous_namespace: self.rendezvous_namespace.clone(),
            rendezvous_rounds: self.rendezvous_rounds,
            rendezvous_interval: self.rendezvous_interval,
            readvertise_rounds: self.readvertise_rounds,
            connect_timeout: self.connect_timeout,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key = key, value = %raw, "Ignoring invalid configuration value");
            None
        }
    }
}

fn parse_addr_list<'a>(entries: impl IntoIterator<Item = &'a str>) -> Vec<Multiaddr> {
    entries
        .into_iter()
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse() {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!(addr = %entry, error = %e, "Ignoring invalid multiaddr");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.rendezvous_rounds, 90);
        assert_eq!(config.rendezvous_interval, Duration::from_secs(1));
        assert_eq!(config.max_connections, 400);
        assert_eq!(config.bootstrap_peers.len(), DEFAULT_BOOTSTRAP_PEERS.len());
        assert!(!config.answer_queries);
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("PUBSUB_TOPIC", "custom-topic"),
            ("RENDEZVOUS_ROUNDS", "5"),
            ("RENDEZVOUS_INTERVAL_MS", "250"),
            ("RENDEZVOUS_READVERTISE_ROUNDS", "4"),
            ("ANSWER_QUERIES", "true"),
            ("LISTEN_ADDRS", "/ip4/127.0.0.1/tcp/4001, /ip4/127.0.0.1/udp/4001/quic-v1"),
            ("METRICS_ADDR", "127.0.0.1:9100"),
        ]));
        assert_eq!(config.pubsub_topic, "custom-topic");
        assert_eq!(config.rendezvous_rounds, 5);
        assert_eq!(config.rendezvous_interval, Duration::from_millis(250));
        assert!(config.answer_queries);
        assert_eq!(config.listen_addrs.len(), 2);
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9100".parse().unwrap()));
        assert_eq!(config.discovery().rendezvous_rounds, 5);
        assert_eq!(config.discovery().readvertise_rounds, 4);
        assert!(config.protocol().answer_queries);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("RENDEZVOUS_ROUNDS", "many"),
            ("MAX_IN_FLIGHT_HANDLERS", "0"),
            ("LISTEN_ADDRS", "not-an-addr"),
        ]));
        assert_eq!(config.rendezvous_rounds, 90);
        assert_eq!(config.max_in_flight_handlers, 1);
        assert_eq!(config.listen_addrs, NodeConfig::default().listen_addrs);
    }

    #[test]
    fn test_empty_bootstrap_list_disables_bootstrap() {
        let config = NodeConfig::from_lookup(lookup(&[("BOOTSTRAP_PEERS", "")]));
        assert!(config.bootstrap_peers.is_empty());
    }
}

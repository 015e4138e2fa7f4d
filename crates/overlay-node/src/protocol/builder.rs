//! Outbound Message Builder
//!
//! Produces ready-to-send bytes for every outbound operation from a single
//! shared template. Builds serialize on the template lock; the critical section
//! covers only setting fields and encoding, never a network send. Each build
//! returns its own freshly encoded buffer.

use super::message::{encode, Message, Op};
use libp2p::PeerId;
use std::sync::{Mutex, PoisonError};

/// Upper bound on peers advertised in one `PeerList` payload.
pub const MAX_PEER_LIST_LEN: usize = 64;

struct Template {
    message: Message,
    last_timestamp: i64,
}

/// Builds encoded outbound control messages.
pub struct MessageBuilder {
    version: String,
    template: Mutex<Template>,
}

impl MessageBuilder {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            template: Mutex::new(Template {
                message: Message::default(),
                last_timestamp: 0,
            }),
        }
    }

    pub fn ping(&self) -> Vec<u8> {
        self.build(Op::Ping, None)
    }

    pub fn pong(&self) -> Vec<u8> {
        self.build(Op::Pong, None)
    }

    pub fn get_version(&self) -> Vec<u8> {
        self.build(Op::GetVersion, None)
    }

    pub fn version_message(&self) -> Vec<u8> {
        self.build(Op::Version, Some(self.version.as_bytes().to_vec()))
    }

    pub fn get_peer_list(&self) -> Vec<u8> {
        self.build(Op::GetPeerList, None)
    }

    /// `PeerList` carrying a JSON array of base58 peer ids (at most
    /// [`MAX_PEER_LIST_LEN`]). An empty snapshot yields an empty payload.
    pub fn peer_list(&self, peers: &[PeerId]) -> Vec<u8> {
        let listed: Vec<String> = peers
            .iter()
            .take(MAX_PEER_LIST_LEN)
            .map(|p| p.to_base58())
            .collect();
        let payload = if listed.is_empty() {
            Vec::new()
        } else {
            serde_json::to_vec(&listed).expect("a list of strings always serializes")
        };
        self.build(Op::PeerList, Some(payload))
    }

    fn build(&self, op: Op, payload: Option<Vec<u8>>) -> Vec<u8> {
        let mut template = self
            .template
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let template = &mut *template;

        let timestamp = chrono::Utc::now()
            .timestamp_millis()
            .max(template.last_timestamp + 1);
        template.last_timestamp = timestamp;

        template.message.op = op;
        template.message.timestamp = timestamp;
        template.message.payload = payload;

        encode(&template.message).expect("outbound template always serializes")
    }
}

/// Parse a `PeerList` payload. Entries that are not valid peer ids are skipped.
pub fn parse_peer_list(payload: &[u8]) -> Result<Vec<PeerId>, serde_json::Error> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let listed: Vec<String> = serde_json::from_slice(payload)?;
    Ok(listed
        .iter()
        .filter_map(|entry| entry.parse::<PeerId>().ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::super::message::decode;
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_each_builder_sets_its_operation() {
        let builder = MessageBuilder::new("0.1.0");
        let cases = [
            (builder.ping(), Op::Ping),
            (builder.pong(), Op::Pong),
            (builder.get_version(), Op::GetVersion),
            (builder.version_message(), Op::Version),
            (builder.get_peer_list(), Op::GetPeerList),
            (builder.peer_list(&[]), Op::PeerList),
        ];
        for (bytes, op) in cases {
            assert_eq!(decode(&bytes).unwrap().op, op);
        }
    }

    #[test]
    fn test_version_payload_does_not_leak() {
        let builder = MessageBuilder::new("0.1.0");
        let version = decode(&builder.version_message()).unwrap();
        assert_eq!(version.payload(), b"0.1.0");

        let ping = decode(&builder.ping()).unwrap();
        assert!(ping.payload.is_none());
    }

    #[test]
    fn test_earlier_builds_are_not_overwritten() {
        let builder = MessageBuilder::new("0.1.0");
        let ping = builder.ping();
        let before = ping.clone();
        let _ = builder.version_message();
        let _ = builder.peer_list(&[PeerId::random()]);

        assert_eq!(ping, before);
        assert!(decode(&ping).unwrap().payload.is_none());
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let builder = MessageBuilder::new("0.1.0");
        let mut last = 0;
        for _ in 0..100 {
            let ts = decode(&builder.ping()).unwrap().timestamp;
            assert!(ts > last);
            last = ts;
        }
    }

    #[test]
    fn test_peer_list_roundtrip() {
        let builder = MessageBuilder::new("0.1.0");
        let peers: Vec<PeerId> = (0..3).map(|_| PeerId::random()).collect();
        let message = decode(&builder.peer_list(&peers)).unwrap();
        assert_eq!(parse_peer_list(message.payload()).unwrap(), peers);

        let empty = decode(&builder.peer_list(&[])).unwrap();
        assert!(parse_peer_list(empty.payload()).unwrap().is_empty());
    }

    #[test]
    fn test_peer_list_is_capped() {
        let builder = MessageBuilder::new("0.1.0");
        let peers: Vec<PeerId> = (0..MAX_PEER_LIST_LEN + 10).map(|_| PeerId::random()).collect();
        let message = decode(&builder.peer_list(&peers)).unwrap();
        assert_eq!(parse_peer_list(message.payload()).unwrap().len(), MAX_PEER_LIST_LEN);
    }

    #[test]
    fn test_parse_peer_list_skips_garbage_entries() {
        let peer = PeerId::random();
        let payload = serde_json::to_vec(&vec![peer.to_base58(), "nope".to_string()]).unwrap();
        assert_eq!(parse_peer_list(&payload).unwrap(), vec![peer]);
        assert!(parse_peer_list(b"{oops").is_err());
    }

    #[test]
    fn test_concurrent_builds_are_well_formed() {
        let builder = Arc::new(MessageBuilder::new("0.1.0"));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let builder = builder.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| {
                            if i % 2 == 0 {
                                (Op::Ping, builder.ping())
                            } else {
                                (Op::Version, builder.version_message())
                            }
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut timestamps = HashSet::new();
        for handle in handles {
            for (op, bytes) in handle.join().unwrap() {
                let message = decode(&bytes).unwrap();
                assert_eq!(message.op, op);
                match op {
                    Op::Version => assert_eq!(message.payload(), b"0.1.0"),
                    _ => assert!(message.payload.is_none()),
                }
                assert!(timestamps.insert(message.timestamp));
            }
        }
        assert_eq!(timestamps.len(), 16 * 50);
    }
}

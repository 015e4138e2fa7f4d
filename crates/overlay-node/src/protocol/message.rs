//! Control Message Wire Format
//!
//! A control message is a small JSON object with tagged fields:
//!
//! ```text
//! {"op": 1, "timestamp": 1718000000000, "payload": "MC4wLjE="}
//! ```
//!
//! - `op`: operation code (`u8`)
//! - `timestamp`: unix time in milliseconds, set by the sender at encode time
//! - `payload`: optional base64 byte string, omitted when absent
//!
//! The sending peer is never serialized. It is attributed by the receiver from
//! the pubsub delivery metadata after decoding.

use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Operation code carried by every control message.
///
/// Values outside the known set survive decoding as [`Op::Unknown`] so that the
/// dispatcher, not the codec, decides what to do with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Op {
    #[default]
    Undefined,
    Ping,
    Pong,
    GetVersion,
    Version,
    GetPeerList,
    PeerList,
    Unknown(u8),
}

impl Op {
    /// All operations a peer may legitimately send.
    pub const KNOWN: [Op; 6] = [
        Op::Ping,
        Op::Pong,
        Op::GetVersion,
        Op::Version,
        Op::GetPeerList,
        Op::PeerList,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Ping => "ping",
            Op::Pong => "pong",
            Op::GetVersion => "getversion",
            Op::Version => "version",
            Op::GetPeerList => "getpeerlist",
            Op::PeerList => "peerlist",
            Op::Undefined | Op::Unknown(_) => "unknown",
        }
    }
}

impl From<u8> for Op {
    fn from(code: u8) -> Self {
        match code {
            0 => Op::Undefined,
            1 => Op::Ping,
            2 => Op::Pong,
            3 => Op::GetVersion,
            4 => Op::Version,
            5 => Op::GetPeerList,
            6 => Op::PeerList,
            other => Op::Unknown(other),
        }
    }
}

impl From<Op> for u8 {
    fn from(op: Op) -> Self {
        match op {
            Op::Undefined => 0,
            Op::Ping => 1,
            Op::Pong => 2,
            Op::GetVersion => 3,
            Op::Version => 4,
            Op::GetPeerList => 5,
            Op::PeerList => 6,
            Op::Unknown(code) => code,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single control message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub op: Op,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_payload"
    )]
    pub payload: Option<Vec<u8>>,
    /// Peer the message was received from. Receiver-attributed only.
    #[serde(skip)]
    pub sender: Option<PeerId>,
}

impl Message {
    pub fn new(op: Op, timestamp: i64) -> Self {
        Self {
            op,
            timestamp,
            payload: None,
            sender: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn payload(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Inbound bytes are not a serialized control message.
    #[error("Malformed message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    /// Outbound message could not be serialized.
    #[error("Encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Serialize a message into wire bytes.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(message).map_err(CodecError::Encode)
}

/// Parse wire bytes into a message. The sender is left unset.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::MalformedMessage)
}

mod base64_payload {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(payload: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match payload {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_every_operation() {
        for op in Op::KNOWN {
            let message = Message::new(op, 1_700_000_000_123);
            let decoded = decode(&encode(&message).unwrap()).unwrap();
            assert_eq!(decoded, message);
            assert!(decoded.sender.is_none());
        }

        let version = Message::new(Op::Version, 42).with_payload(b"0.1.0".to_vec());
        assert_eq!(decode(&encode(&version).unwrap()).unwrap(), version);
    }

    #[test]
    fn test_sender_is_not_serialized() {
        let mut message = Message::new(Op::Ping, 7);
        message.sender = Some(PeerId::random());

        let json: serde_json::Value = serde_json::from_slice(&encode(&message).unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({ "op": 1, "timestamp": 7 }));
        assert!(decode(&encode(&message).unwrap()).unwrap().sender.is_none());
    }

    #[test]
    fn test_payload_is_base64() {
        let message = Message::new(Op::Version, 1).with_payload(b"0.0.1".to_vec());
        let json: serde_json::Value = serde_json::from_slice(&encode(&message).unwrap()).unwrap();
        assert_eq!(json["payload"], "MC4wLjE=");
    }

    #[test]
    fn test_unknown_operation_decodes() {
        let message = decode(br#"{"op":42,"timestamp":1}"#).unwrap();
        assert_eq!(message.op, Op::Unknown(42));
        assert_eq!(u8::from(message.op), 42);
    }

    #[test]
    fn test_unknown_fields_and_missing_op() {
        let message = decode(br#"{"timestamp":5,"hops":3,"payload":null}"#).unwrap();
        assert_eq!(message.op, Op::Undefined);
        assert_eq!(message.timestamp, 5);
        assert!(message.payload.is_none());
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        for bytes in [
            &b""[..],
            b"\x00\x01\x02",
            b"not json",
            br#"{"op":"ping"}"#,
            br#"{"op":300}"#,
            br#"{"op":1,"payload":"%%%"}"#,
        ] {
            assert!(matches!(decode(bytes), Err(CodecError::MalformedMessage(_))));
        }
    }
}

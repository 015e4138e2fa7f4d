//! Control Protocol
//!
//! Wire codec, outbound message builder and the inbound dispatch loop for the
//! overlay's control topic (ping/pong liveness, version and peer-list exchange).

pub mod builder;
pub mod dispatcher;
pub mod message;

pub use builder::{parse_peer_list, MessageBuilder, MAX_PEER_LIST_LEN};
pub use dispatcher::{ProtocolConfig, ProtocolServer};
pub use message::{decode, encode, CodecError, Message, Op};

//! Overlay Node Library
//!
//! Participant in a peer-to-peer overlay: a JSON control protocol broadcast
//! over gossipsub, and peer discovery from bootstrap peers, the local network
//! and a DHT rendezvous key.

pub mod network;
pub mod observability;
pub mod protocol;
pub mod version;

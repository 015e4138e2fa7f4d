//! Network Type Definitions
//!
//! Peer records produced by discovery and the protocol-layer peer book.

mod book;
mod peer;

pub use book::{spawn_cleanup_loop, PeerBook, PeerEntry, PeerOrigin};
pub use peer::{short_id, PeerAddrError, PeerRecord, PeerSource};

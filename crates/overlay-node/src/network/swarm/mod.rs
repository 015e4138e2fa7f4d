//! Swarm Module
//!
//! Manages the libp2p swarm including creation, event handling, and lifecycle.
//! The event loop owns the swarm; everything else talks to it through
//! [`SwarmHandle`].

mod builder;
mod event_loop;
mod handle;
mod pending;

pub use builder::{build_network, build_swarm, Network};
pub use event_loop::EventLoop;
pub use handle::{GossipSubscription, SwarmCommand, SwarmHandle};

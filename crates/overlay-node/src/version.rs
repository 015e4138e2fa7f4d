/// Crate version from Cargo.toml, announced in `Version` messages
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version string for libp2p identify.
pub const PROTOCOL_VERSION: &str = concat!("/overlay/", env!("CARGO_PKG_VERSION"));

/// Returns the version string announced to other peers.
pub fn full_version() -> String {
    format!("{} {VERSION}", env!("CARGO_PKG_NAME"))
}

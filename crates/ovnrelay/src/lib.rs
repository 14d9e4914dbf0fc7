//! ovnrelay — peer discovery and reliable delivery over the overlay.
//!
//! Co-hosts the two components that share the overlay transport handle:
//!
//! - **discovery**: announces our hostname, tracks peers from their
//!   announces, publishes `peer_discovery.json`
//! - **delivery**: the per-(file, peer) confirmation and retry ledger
//! - **sender**: the 1 Hz loop draining `pending/`, pacing radio sends,
//!   retrying unconfirmed files and cleaning up `sent_buffer/`

pub mod delivery;
pub mod discovery;
pub mod sender;

pub use delivery::DeliveryTable;
pub use discovery::PeerDiscovery;
pub use sender::Relay;

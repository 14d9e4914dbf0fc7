//! taklink-core — shared domain logic for the taklink bridge.
//!
//! The three daemons (`linkmon`, `ovnrelay`, `cotbridge`) cooperate through
//! an on-disk spool and two JSON state files. Everything they share lives
//! here:
//!
//! - **config**: environment-derived configuration and the hostname map
//! - **codec**: dictionary-assisted zstd compression under a hard size cap
//! - **dedup**: the recent-fingerprint ring
//! - **spool**: the three-directory disk queue (`pending`, `sent_buffer`,
//!   `incoming`)
//! - **status**: the `node_status.json` contract (written by linkmon)
//! - **peers**: the `peer_discovery.json` contract (written by ovnrelay)
//! - **metric_names**: metric name constants

pub mod clock;
pub mod codec;
pub mod config;
pub mod dedup;
pub mod metric_names;
pub mod peers;
pub mod spool;
pub mod status;
pub mod throttle;

pub use codec::{CodecError, CotCodec};
pub use config::Config;
pub use dedup::{fingerprint, Observation, RecentRing};
pub use peers::{PeerEntry, PeerFile, PeerReader};
pub use spool::{Spool, Stage};
pub use status::{LinkMode, NodeEntry, NodeStatus, StatusReader};
pub use throttle::Throttle;

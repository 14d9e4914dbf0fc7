//! cotbridge — the multicast packet bridge.
//!
//! Sits between the local CoT application and the overlay spool. Upstream
//! datagrams from local sources are deduplicated, dictionary-compressed
//! and written to `pending/` whenever a fallback peer exists; payloads
//! arriving from the overlay are drained from `incoming/`, decompressed,
//! deduplicated and re-emitted on the downstream multicast groups.
//!
//! - **mcast**: multicast socket plumbing and the local-address set
//! - **ingress**: local app → spool
//! - **egress**: spool → local app, plus the quiescence purge

pub mod egress;
pub mod ingress;
pub mod mcast;

use std::path::PathBuf;
use std::sync::Mutex;

use taklink_core::{Config, CotCodec, RecentRing, Spool};

/// State shared by the ingress and egress tasks.
pub struct Bridge {
    pub codec: CotCodec,
    /// One ring for both directions, so a payload we just forwarded out is
    /// recognized if it echoes back in.
    pub dedup: Mutex<RecentRing>,
    pub spool: Spool,
    pub status_path: PathBuf,
    pub peers_path: PathBuf,
}

impl Bridge {
    pub fn new(config: &Config) -> std::io::Result<Self> {
        Ok(Self {
            codec: CotCodec::from_dict_path(
                &config.dict_path,
                taklink_core::codec::DEFAULT_LEVEL,
                taklink_core::config::MAX_PACKET_BYTES,
            ),
            dedup: Mutex::new(RecentRing::default()),
            spool: Spool::open(config.spool_dir())?,
            status_path: config.node_status_path(),
            peers_path: config.peer_discovery_path(),
        })
    }
}

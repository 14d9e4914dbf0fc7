//! The `peer_discovery.json` contract.
//!
//! Written by ovnrelay whenever the peer map changes, read by the bridge to
//! decide whether any fallback peer is reachable. The `destination_hash`
//! value is the opaque endpoint token exactly as the overlay announced it —
//! it is NOT derivable from the peer's public key, and this file is the
//! only place it crosses a process boundary. Never contains the local
//! node.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One discovered peer, keyed by hostname in [`PeerFile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Hex rendering of the announced destination hash, byte-for-byte.
    pub destination_hash: String,
    /// Unix seconds of the most recent announce.
    pub last_seen: i64,
}

/// The persisted peer map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerFile {
    pub timestamp: i64,
    pub peers: BTreeMap<String, PeerEntry>,
}

impl PeerFile {
    pub fn empty(timestamp: i64) -> Self {
        Self { timestamp, peers: BTreeMap::new() }
    }

    pub fn contains(&self, hostname: &str) -> bool {
        self.peers.contains_key(hostname)
    }
}

/// Replace the peer file atomically (temp + rename).
pub fn write_peers(path: &Path, peers: &PeerFile) -> io::Result<()> {
    let json = serde_json::to_string_pretty(peers).map_err(io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}

/// Parse the peer file once.
pub fn read_peers(path: &Path) -> Option<PeerFile> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Stale-tolerant reader mirroring [`crate::status::StatusReader`].
#[derive(Debug)]
pub struct PeerReader {
    path: PathBuf,
    cached: Option<PeerFile>,
}

impl PeerReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cached: None }
    }

    pub fn read(&mut self) -> Option<&PeerFile> {
        if let Some(fresh) = read_peers(&self.path) {
            self.cached = Some(fresh);
        }
        self.cached.as_ref()
    }
}

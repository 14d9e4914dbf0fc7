//! The `node_status.json` contract.
//!
//! Written once per second by linkmon, read by everyone else. Readers must
//! tolerate a torn moment between writer ticks: the file is replaced
//! atomically, and a reader keeps its last successfully parsed snapshot
//! when a read or parse fails (`ParseFailure` never overwrites state and
//! never crashes a loop).

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Link classification for one remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkMode {
    /// The WiFi mesh path is usable; the overlay is idle for this node.
    #[serde(rename = "FAST")]
    Fast,
    /// The mesh path is down; traffic falls back to the overlay.
    #[serde(rename = "SLOW")]
    Slow,
}

/// Status row for one remote node, keyed by MAC in [`NodeStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub hostname: String,
    pub ip: String,
    /// Seconds since the last originator message (capped, not infinite,
    /// so it stays representable in JSON).
    pub last_seen: f64,
    pub mode: LinkMode,
    pub failure_count: u32,
    pub good_count: u32,
    pub throughput: Option<f64>,
    pub nexthop: Option<String>,
}

/// The full status map. Contains every remote node in the hostname map,
/// reachable or not; never contains the local node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub timestamp: i64,
    pub nodes: BTreeMap<String, NodeEntry>,
}

impl NodeStatus {
    pub fn empty(timestamp: i64) -> Self {
        Self { timestamp, nodes: BTreeMap::new() }
    }

    /// Hostnames currently classified Slow, sorted. This is the stable
    /// iteration order used for overlay sends.
    pub fn slow_hostnames(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .nodes
            .values()
            .filter(|entry| entry.mode == LinkMode::Slow)
            .map(|entry| entry.hostname.clone())
            .collect();
        hosts.sort();
        hosts
    }

    pub fn any_slow(&self) -> bool {
        self.nodes.values().any(|entry| entry.mode == LinkMode::Slow)
    }
}

/// Replace the status file atomically (temp + rename).
pub fn write_status(path: &Path, status: &NodeStatus) -> io::Result<()> {
    let json = serde_json::to_string_pretty(status).map_err(io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}

/// Parse the status file once, for startup seeding.
pub fn read_status(path: &Path) -> Option<NodeStatus> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Stale-tolerant reader: refreshes from disk on every call and falls back
/// to the last good snapshot when the file is missing or mid-replace.
#[derive(Debug)]
pub struct StatusReader {
    path: PathBuf,
    cached: Option<NodeStatus>,
}

impl StatusReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cached: None }
    }

    pub fn read(&mut self) -> Option<&NodeStatus> {
        if let Some(fresh) = read_status(&self.path) {
            self.cached = Some(fresh);
        }
        self.cached.as_ref()
    }
}

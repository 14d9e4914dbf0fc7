//! Per-node link classification with hysteresis.
//!
//! A node flips Fast → Slow only after `failure_count` consecutive bad
//! samples, and Slow → Fast only after `recovery_count` consecutive good
//! ones, so any oscillation needs at least their sum of contradictory
//! samples in a row. Counters are mutually exclusive: a sample resets
//! whichever counter it contradicts.

use std::collections::BTreeMap;

use taklink_core::config::{HostEntry, LinkTunables};
use taklink_core::status::{LinkMode, NodeEntry, NodeStatus};

use crate::telemetry::OgmSample;

/// `last_seen` stand-in for a node absent from telemetry. Large but finite
/// so it serializes cleanly.
const UNSEEN_SECS: f64 = 999.0;

#[derive(Debug, Clone, Copy)]
struct NodeState {
    mode: LinkMode,
    failure_count: u32,
    good_count: u32,
}

impl NodeState {
    fn fresh() -> Self {
        Self { mode: LinkMode::Fast, failure_count: 0, good_count: 0 }
    }
}

/// The monitor's whole state: the static host map plus per-node counters.
#[derive(Debug)]
pub struct LinkMonitor {
    tunables: LinkTunables,
    local_mac: Option<String>,
    hosts: BTreeMap<String, HostEntry>,
    states: BTreeMap<String, NodeState>,
}

impl LinkMonitor {
    pub fn new(
        hosts: BTreeMap<String, HostEntry>,
        local_mac: Option<String>,
        tunables: LinkTunables,
    ) -> Self {
        Self { tunables, local_mac, hosts, states: BTreeMap::new() }
    }

    /// Restore counters and modes from a previous run's status file, so a
    /// monitor restart does not reset Slow nodes to Fast.
    pub fn seed_from(&mut self, status: &NodeStatus) {
        for (mac, entry) in &status.nodes {
            if self.hosts.contains_key(mac) {
                self.states.insert(
                    mac.clone(),
                    NodeState {
                        mode: entry.mode,
                        failure_count: entry.failure_count,
                        good_count: entry.good_count,
                    },
                );
            }
        }
    }

    /// Fold one telemetry snapshot into the counters and produce the status
    /// map to publish. Every remote node in the host map gets an entry,
    /// seen or not; the local node never does.
    pub fn apply_samples(&mut self, samples: &[OgmSample], now: i64) -> NodeStatus {
        let mut nodes = BTreeMap::new();

        for (mac, host) in &self.hosts {
            if self.local_mac.as_deref() == Some(mac.as_str()) {
                continue;
            }

            let sample = samples.iter().find(|s| &s.mac == mac);
            let last_seen = sample.map_or(UNSEEN_SECS, |s| s.last_seen_secs);
            let state = self.states.entry(mac.clone()).or_insert_with(NodeState::fresh);

            if last_seen > self.tunables.failure_threshold {
                state.failure_count += 1;
                state.good_count = 0;
                if state.failure_count >= self.tunables.failure_count {
                    state.mode = LinkMode::Slow;
                }
            } else {
                state.good_count += 1;
                state.failure_count = 0;
                if state.good_count >= self.tunables.recovery_count {
                    state.mode = LinkMode::Fast;
                }
            }

            nodes.insert(
                mac.clone(),
                NodeEntry {
                    hostname: host.hostname.clone(),
                    ip: host.ip.clone(),
                    last_seen,
                    mode: state.mode,
                    failure_count: state.failure_count,
                    good_count: state.good_count,
                    throughput: sample.and_then(|s| s.throughput_mbit),
                    nexthop: sample.and_then(|s| s.nexthop.clone()),
                },
            );
        }

        NodeStatus { timestamp: now, nodes }
    }
}

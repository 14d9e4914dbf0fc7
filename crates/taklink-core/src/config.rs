//! Configuration for all taklink daemons.
//!
//! Everything comes from `TAKLINK_*` environment variables with defaults,
//! gathered once at startup into a [`Config`] passed by reference. The
//! static hostname map (mac → hostname/ip) is a JSON file maintained by the
//! mesh provisioning tooling; taklink only reads it.

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Application namespace on the overlay. Announce filtering and destination
/// derivation both key off this pair.
pub const APP_NAME: &str = "atak";
pub const ASPECT: &str = "cot";

/// Hard cap on a compressed payload bound for the radio.
pub const MAX_PACKET_BYTES: usize = 350;

/// Capacity of the recent-fingerprint ring.
pub const MAX_RECENT_PACKETS: usize = 1000;

/// Link-quality sampling tunables.
#[derive(Debug, Clone, Copy)]
pub struct LinkTunables {
    /// Seconds without an originator message before a sample counts as a
    /// failure.
    pub failure_threshold: f64,
    /// Consecutive failures before Fast → Slow.
    pub failure_count: u32,
    /// Consecutive good samples before Slow → Fast.
    pub recovery_count: u32,
}

impl Default for LinkTunables {
    fn default() -> Self {
        Self { failure_threshold: 3.0, failure_count: 3, recovery_count: 10 }
    }
}

/// Retry schedule for unconfirmed overlay sends.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub backoff_factor: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// ± fraction of randomness applied to each computed delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(25),
            backoff_factor: 2,
            max_delay: Duration::from_secs(120),
            max_attempts: 5,
            jitter: 0.1,
        }
    }
}

/// Daemon-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for the spool and state files.
    pub base_dir: PathBuf,
    /// Static mac → {hostname, ip} map.
    pub hostname_map_path: PathBuf,
    /// Pre-trained zstd dictionary blob.
    pub dict_path: PathBuf,
    /// MAC address of this node, excluded from monitoring.
    pub local_mac: Option<String>,
    /// Bridge interface IPv4 for multicast membership and sends.
    pub bridge_ip: Option<std::net::Ipv4Addr>,
    /// Upstream groups: local app → bridge.
    pub upstream: Vec<SocketAddrV4>,
    /// Downstream groups: bridge → local app. Ports must differ from
    /// upstream to prevent loops.
    pub downstream: Vec<SocketAddrV4>,
    /// Settling time for the radio before the transport comes up.
    pub startup_delay: Duration,
    pub announce_interval: Duration,
    pub peer_timeout: Duration,
    pub send_spacing: Duration,
    pub packet_timeout: Duration,
    pub link: LinkTunables,
    pub retry: RetryPolicy,
}

impl Config {
    /// Build from `TAKLINK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let base_dir: PathBuf = std::env::var("TAKLINK_BASE_DIR")
            .unwrap_or_else(|_| "/var/lib/taklink".to_owned())
            .into();
        let hostname_map_path = std::env::var("TAKLINK_HOSTNAME_MAP")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base_dir.join("hostname_map.json"));
        let dict_path = std::env::var("TAKLINK_DICT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base_dir.join("cot.dict"));
        let local_mac = std::env::var("TAKLINK_LOCAL_MAC")
            .ok()
            .filter(|s| !s.is_empty());
        let bridge_ip = std::env::var("TAKLINK_BRIDGE_IFACE_IP")
            .ok()
            .and_then(|s| s.parse().ok());
        let upstream = parse_group_list(
            &std::env::var("TAKLINK_UPSTREAM")
                .unwrap_or_else(|_| "224.10.10.1:17012,239.2.3.1:6969".to_owned()),
        );
        let downstream = parse_group_list(
            &std::env::var("TAKLINK_DOWNSTREAM")
                .unwrap_or_else(|_| "224.10.10.1:17013,239.2.3.1:6971".to_owned()),
        );
        let startup_delay = Duration::from_secs(env_u64("TAKLINK_STARTUP_DELAY", 10));

        Self {
            base_dir,
            hostname_map_path,
            dict_path,
            local_mac,
            bridge_ip,
            upstream,
            downstream,
            startup_delay,
            announce_interval: Duration::from_secs(60),
            peer_timeout: Duration::from_secs(300),
            send_spacing: Duration::from_secs(2),
            packet_timeout: Duration::from_secs(300),
            link: LinkTunables::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn node_status_path(&self) -> PathBuf {
        self.base_dir.join("node_status.json")
    }

    pub fn peer_discovery_path(&self) -> PathBuf {
        self.base_dir.join("peer_discovery.json")
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.base_dir.join("spool")
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Parse `"addr:port,addr:port"` into socket addresses, skipping junk.
fn parse_group_list(raw: &str) -> Vec<SocketAddrV4> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// One row of the static hostname map.
#[derive(Debug, Clone, Deserialize)]
pub struct HostEntry {
    pub hostname: String,
    pub ip: String,
}

/// Load the mac → host map. The map is provisioning-owned; a missing or
/// malformed file is an error the caller decides how to handle.
pub fn load_hostname_map(path: &Path) -> io::Result<BTreeMap<String, HostEntry>> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(io::Error::other)
}

/// This node's hostname, announced to peers as opaque app data.
pub fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".into())
}

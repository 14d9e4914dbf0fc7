//! Upstream intake: local CoT datagrams → `pending/`.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use taklink_core::dedup::Observation;
use taklink_core::{clock, metric_names, PeerReader, Stage, StatusReader, Throttle};

use crate::mcast;
use crate::Bridge;

/// Per-datagram outcome, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressOutcome {
    /// Written to `pending/`.
    Spooled,
    /// Source was not one of our local addresses.
    RemoteSource,
    /// Recently seen payload.
    Duplicate,
    /// No slow, discovered peer: the overlay has no work to do.
    NoFallbackPeer,
    /// Codec refused the payload.
    CodecRefused,
    /// Spool write failed.
    SpoolFailed,
}

/// Shared intake logic for one datagram. The caller owns the readers so
/// their parse caches survive across datagrams.
pub fn handle_datagram(
    bridge: &Bridge,
    payload: &[u8],
    src: &std::net::SocketAddr,
    local: &HashSet<Ipv4Addr>,
    status: &mut StatusReader,
    peers: &mut PeerReader,
) -> IngressOutcome {
    if !mcast::is_local_source(&src.ip(), local) {
        return IngressOutcome::RemoteSource;
    }

    // Fingerprint the raw payload so the same event is recognized whether
    // it arrives here or decompressed from the overlay.
    let fp = taklink_core::fingerprint(payload);
    if bridge.dedup.lock().expect("dedup lock").observe(fp) == Observation::WasSeen {
        metrics::counter!(metric_names::BRIDGE_DUPLICATES).increment(1);
        return IngressOutcome::Duplicate;
    }

    // Only spool when somebody will actually drain it: a peer that is both
    // slow and discovered on the overlay.
    let slow_hosts: Vec<String> = status
        .read()
        .map(|s| s.slow_hostnames())
        .unwrap_or_default();
    let has_fallback_peer = peers
        .read()
        .map(|file| slow_hosts.iter().any(|host| file.contains(host)))
        .unwrap_or(false);
    if !has_fallback_peer {
        return IngressOutcome::NoFallbackPeer;
    }

    let compressed = match bridge.codec.compress(payload) {
        Ok(bytes) => bytes,
        Err(_) => return IngressOutcome::CodecRefused,
    };

    match bridge.spool.store(Stage::Pending, &compressed, clock::unix_millis()) {
        Ok(_) => IngressOutcome::Spooled,
        Err(_) => IngressOutcome::SpoolFailed,
    }
}

/// Listen on one upstream group until shutdown.
pub async fn ingress_loop(
    bridge: Arc<Bridge>,
    socket: UdpSocket,
    group: SocketAddrV4,
    local: Arc<HashSet<Ipv4Addr>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut status = StatusReader::new(&bridge.status_path);
    let mut peers = PeerReader::new(&bridge.peers_path);
    let mut drop_warn = Throttle::per_minute();
    let mut io_warn = Throttle::per_minute();
    let mut buf = vec![0u8; 65_536];

    info!(group = %group, "listening upstream");

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, src) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        if let Some(suppressed) = io_warn.allow() {
                            warn!(group = %group, error = %e, suppressed, "receive failed");
                        }
                        continue;
                    }
                };

                let outcome = handle_datagram(
                    &bridge, &buf[..len], &src, &local, &mut status, &mut peers,
                );
                match outcome {
                    IngressOutcome::Spooled => {
                        debug!(group = %group, bytes = len, "datagram spooled");
                    }
                    IngressOutcome::CodecRefused | IngressOutcome::SpoolFailed => {
                        if let Some(suppressed) = drop_warn.allow() {
                            warn!(group = %group, ?outcome, suppressed, "datagram dropped");
                        }
                    }
                    // Routine drops: duplicates, remote echoes, no fallback
                    // work to do.
                    _ => {}
                }
            }
            _ = shutdown.changed() => {
                debug!(group = %group, "ingress stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::net::SocketAddr;

    use taklink_core::peers::{write_peers, PeerEntry, PeerFile};
    use taklink_core::status::{write_status, LinkMode, NodeEntry, NodeStatus};
    use taklink_core::Config;

    fn temp_config() -> Config {
        let base = std::env::temp_dir().join(format!(
            "cotbridge-ingress-{}-{}",
            std::process::id(),
            rand::random::<u64>()
        ));
        std::fs::create_dir_all(&base).unwrap();
        let mut config = Config::from_env();
        config.base_dir = base.clone();
        config.dict_path = base.join("missing.dict");
        config
    }

    fn write_slow_peer(config: &Config, hostname: &str) {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "aa:bb:cc:dd:ee:01".to_owned(),
            NodeEntry {
                hostname: hostname.to_owned(),
                ip: "10.0.0.2".to_owned(),
                last_seen: 999.0,
                mode: LinkMode::Slow,
                failure_count: 5,
                good_count: 0,
                throughput: None,
                nexthop: None,
            },
        );
        write_status(
            &config.node_status_path(),
            &NodeStatus { timestamp: 1, nodes },
        )
        .unwrap();

        let mut peers = BTreeMap::new();
        peers.insert(
            hostname.to_owned(),
            PeerEntry {
                destination_hash: "00".repeat(16),
                last_seen: 1,
            },
        );
        write_peers(
            &config.peer_discovery_path(),
            &PeerFile { timestamp: 1, peers },
        )
        .unwrap();
    }

    fn local_src() -> SocketAddr {
        "127.0.0.1:17012".parse().unwrap()
    }

    fn harness(config: &Config) -> (Bridge, HashSet<Ipv4Addr>, StatusReader, PeerReader) {
        let bridge = Bridge::new(config).unwrap();
        let mut local = HashSet::new();
        local.insert(Ipv4Addr::LOCALHOST);
        let status = StatusReader::new(config.node_status_path());
        let peers = PeerReader::new(config.peer_discovery_path());
        (bridge, local, status, peers)
    }

    fn payload() -> Vec<u8> {
        b"<event uid=\"TEST-1\" type=\"a-f-G\"><point lat=\"1\" lon=\"2\"/></event>".to_vec()
    }

    #[test]
    fn local_datagram_lands_in_pending() {
        let config = temp_config();
        write_slow_peer(&config, "node-b");
        let (bridge, local, mut status, mut peers) = harness(&config);

        let outcome = handle_datagram(
            &bridge, &payload(), &local_src(), &local, &mut status, &mut peers,
        );
        assert_eq!(outcome, IngressOutcome::Spooled);
        assert_eq!(bridge.spool.list(Stage::Pending).unwrap().len(), 1);
    }

    #[test]
    fn remote_source_is_rejected() {
        let config = temp_config();
        write_slow_peer(&config, "node-b");
        let (bridge, local, mut status, mut peers) = harness(&config);

        let remote: SocketAddr = "10.0.0.99:17012".parse().unwrap();
        let outcome =
            handle_datagram(&bridge, &payload(), &remote, &local, &mut status, &mut peers);
        assert_eq!(outcome, IngressOutcome::RemoteSource);
        assert!(bridge.spool.list(Stage::Pending).unwrap().is_empty());
    }

    #[test]
    fn duplicate_payload_spools_once() {
        let config = temp_config();
        write_slow_peer(&config, "node-b");
        let (bridge, local, mut status, mut peers) = harness(&config);

        let first = handle_datagram(
            &bridge, &payload(), &local_src(), &local, &mut status, &mut peers,
        );
        let second = handle_datagram(
            &bridge, &payload(), &local_src(), &local, &mut status, &mut peers,
        );
        assert_eq!(first, IngressOutcome::Spooled);
        assert_eq!(second, IngressOutcome::Duplicate);
        assert_eq!(bridge.spool.list(Stage::Pending).unwrap().len(), 1);
    }

    #[test]
    fn nothing_spools_without_a_slow_discovered_peer() {
        let config = temp_config();
        let (bridge, local, mut status, mut peers) = harness(&config);

        // No state files at all.
        let outcome = handle_datagram(
            &bridge, &payload(), &local_src(), &local, &mut status, &mut peers,
        );
        assert_eq!(outcome, IngressOutcome::NoFallbackPeer);

        // A slow node that was never discovered on the overlay is not a
        // target either.
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "aa:bb:cc:dd:ee:01".to_owned(),
            NodeEntry {
                hostname: "node-b".to_owned(),
                ip: "10.0.0.2".to_owned(),
                last_seen: 999.0,
                mode: LinkMode::Slow,
                failure_count: 5,
                good_count: 0,
                throughput: None,
                nexthop: None,
            },
        );
        write_status(
            &config.node_status_path(),
            &NodeStatus { timestamp: 1, nodes },
        )
        .unwrap();
        write_peers(&config.peer_discovery_path(), &PeerFile::empty(1)).unwrap();

        let outcome = handle_datagram(
            &bridge,
            b"another payload",
            &local_src(),
            &local,
            &mut status,
            &mut peers,
        );
        assert_eq!(outcome, IngressOutcome::NoFallbackPeer);
        assert!(bridge.spool.list(Stage::Pending).unwrap().is_empty());
    }

    #[test]
    fn incompressible_payload_is_refused() {
        let config = temp_config();
        write_slow_peer(&config, "node-b");
        let (bridge, local, mut status, mut peers) = harness(&config);

        let noise: Vec<u8> = (0..8192).map(|_| rand::random::<u8>()).collect();
        let outcome =
            handle_datagram(&bridge, &noise, &local_src(), &local, &mut status, &mut peers);
        assert_eq!(outcome, IngressOutcome::CodecRefused);
        assert!(bridge.spool.list(Stage::Pending).unwrap().is_empty());
    }

    #[test]
    fn spooled_file_is_decompressible() {
        let config = temp_config();
        write_slow_peer(&config, "node-b");
        let (bridge, local, mut status, mut peers) = harness(&config);

        handle_datagram(&bridge, &payload(), &local_src(), &local, &mut status, &mut peers);
        let files = bridge.spool.list(Stage::Pending).unwrap();
        let compressed = std::fs::read(&files[0]).unwrap();
        assert!(compressed.len() <= taklink_core::config::MAX_PACKET_BYTES);
        assert_eq!(bridge.codec.decompress(&compressed).unwrap(), payload());
    }
}

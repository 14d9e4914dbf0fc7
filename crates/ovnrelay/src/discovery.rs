//! Peer discovery over the overlay.
//!
//! We announce our hostname as opaque app data; peers do the same. Every
//! valid announce upserts the peer map, which is mirrored to
//! `peer_discovery.json` for the bridge. The stored destination hash is the
//! announced value byte-for-byte — a peer that restarts announces a fresh
//! hash under the same hostname and simply replaces the old one.
//!
//! Peers are process-lifetime state: startup begins from an empty map and
//! an empty file.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use ovn::{DestinationHash, OverlayTransport};
use taklink_core::peers::{write_peers, PeerEntry, PeerFile};

/// One discovered peer.
#[derive(Debug, Clone)]
pub struct Peer {
    pub destination: DestinationHash,
    pub last_seen: i64,
}

/// What an announce did to the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceOutcome {
    /// Our own announce echoed back; ignored.
    SelfEcho,
    /// Empty or non-UTF-8 app data; ignored.
    Invalid,
    /// First sighting of this hostname. The caller owes the peer a
    /// responsive announce so discovery becomes bidirectional.
    New,
    /// Known hostname refreshed (possibly with a replaced destination).
    Refreshed,
}

/// The peer map plus its on-disk mirror. Map and file share one mutex;
/// announce handling and pruning may run concurrently.
pub struct PeerDiscovery {
    path: PathBuf,
    local_destination: DestinationHash,
    peer_timeout_secs: i64,
    peers: Mutex<BTreeMap<String, Peer>>,
}

impl PeerDiscovery {
    /// Create the discovery state and truncate any persisted peer map from
    /// a previous run.
    pub fn new(
        path: PathBuf,
        local_destination: DestinationHash,
        peer_timeout: Duration,
        now: i64,
    ) -> io::Result<Self> {
        write_peers(&path, &PeerFile::empty(now))?;
        Ok(Self {
            path,
            local_destination,
            peer_timeout_secs: peer_timeout.as_secs() as i64,
            peers: Mutex::new(BTreeMap::new()),
        })
    }

    /// Apply one announce event.
    pub fn handle_announce(
        &self,
        destination_hash: DestinationHash,
        app_data: &[u8],
        now: i64,
    ) -> AnnounceOutcome {
        if destination_hash == self.local_destination {
            return AnnounceOutcome::SelfEcho;
        }
        let hostname = match std::str::from_utf8(app_data) {
            Ok(s) if !s.trim().is_empty() => s.trim().to_owned(),
            _ => return AnnounceOutcome::Invalid,
        };

        let mut peers = self.peers.lock().expect("peer map lock");
        let outcome = match peers.get_mut(&hostname) {
            Some(peer) => {
                if peer.destination != destination_hash {
                    info!(
                        peer = %hostname,
                        destination = %destination_hash,
                        "peer re-announced with a new destination"
                    );
                    peer.destination = destination_hash;
                }
                peer.last_seen = now;
                AnnounceOutcome::Refreshed
            }
            None => {
                info!(peer = %hostname, destination = %destination_hash, "peer discovered");
                peers.insert(
                    hostname.clone(),
                    Peer { destination: destination_hash, last_seen: now },
                );
                AnnounceOutcome::New
            }
        };
        self.persist_locked(&peers, now);
        outcome
    }

    /// Drop peers unheard from for longer than the timeout.
    pub fn prune(&self, now: i64) -> Vec<String> {
        let mut peers = self.peers.lock().expect("peer map lock");
        let stale: Vec<String> = peers
            .iter()
            .filter(|(_, peer)| now - peer.last_seen > self.peer_timeout_secs)
            .map(|(hostname, _)| hostname.clone())
            .collect();
        for hostname in &stale {
            info!(peer = %hostname, "peer timed out");
            peers.remove(hostname);
        }
        if !stale.is_empty() {
            self.persist_locked(&peers, now);
        }
        stale
    }

    /// The destination to route to for a hostname, if discovered.
    pub fn lookup(&self, hostname: &str) -> Option<DestinationHash> {
        self.peers
            .lock()
            .expect("peer map lock")
            .get(hostname)
            .map(|peer| peer.destination)
    }

    /// Currently discovered hostnames.
    pub fn hostnames(&self) -> HashSet<String> {
        self.peers
            .lock()
            .expect("peer map lock")
            .keys()
            .cloned()
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().expect("peer map lock").len()
    }

    fn persist_locked(&self, peers: &BTreeMap<String, Peer>, now: i64) {
        let file = PeerFile {
            timestamp: now,
            peers: peers
                .iter()
                .map(|(hostname, peer)| {
                    (
                        hostname.clone(),
                        PeerEntry {
                            destination_hash: peer.destination.to_hex(),
                            last_seen: peer.last_seen,
                        },
                    )
                })
                .collect(),
        };
        if let Err(e) = write_peers(&self.path, &file) {
            warn!(error = %e, "peer map persist failed");
        }
    }
}

/// Announce our presence immediately, then on every interval; prune stale
/// peers on the same cadence.
pub async fn announce_loop(
    transport: std::sync::Arc<dyn OverlayTransport>,
    discovery: std::sync::Arc<PeerDiscovery>,
    hostname: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = transport.announce(hostname.as_bytes()) {
                    warn!(error = %e, "announce failed");
                } else {
                    debug!(hostname = %hostname, "announced");
                }
                discovery.prune(taklink_core::clock::unix_secs());
            }
            _ = shutdown.changed() => {
                debug!("announce loop stopping");
                break;
            }
        }
    }
}

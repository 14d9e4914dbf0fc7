//! Downstream drain: `incoming/` → local multicast, plus the quiescence
//! purge.

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use taklink_core::dedup::Observation;
use taklink_core::{metric_names, Stage, StatusReader, Throttle};

use crate::Bridge;

/// How often `incoming/` is polled.
pub const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// Claim, decompress and dedup everything in `incoming/`, returning the
/// payloads to emit downstream, oldest first.
///
/// Each file is renamed to a scratch name before processing and unlinked
/// only afterwards; a crash in between leaves the scratch file to
/// resurface on the next pass, where the dedup ring keeps the replay from
/// emitting twice.
pub fn drain_incoming(bridge: &Bridge, codec_warn: &mut Throttle, io_warn: &mut Throttle) -> Vec<Vec<u8>> {
    let files = match bridge.spool.list(Stage::Incoming) {
        Ok(files) => files,
        Err(e) => {
            if let Some(suppressed) = io_warn.allow() {
                warn!(error = %e, suppressed, "incoming listing failed");
            }
            return Vec::new();
        }
    };

    let mut payloads = Vec::new();
    for path in files {
        let claimed = match bridge.spool.claim(&path) {
            Ok(claimed) => claimed,
            // Vanished or contended; the next pass settles it.
            Err(_) => continue,
        };
        let compressed = match std::fs::read(&claimed) {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Some(suppressed) = io_warn.allow() {
                    warn!(file = %claimed.display(), error = %e, suppressed, "incoming read failed");
                }
                continue;
            }
        };

        let payload = match bridge.codec.decompress(&compressed) {
            Ok(payload) => payload,
            Err(e) => {
                if let Some(suppressed) = codec_warn.allow() {
                    warn!(file = %claimed.display(), error = %e, suppressed, "undecodable payload discarded");
                }
                let _ = bridge.spool.remove(&claimed);
                continue;
            }
        };

        let fp = taklink_core::fingerprint(&payload);
        if bridge.dedup.lock().expect("dedup lock").observe(fp) == Observation::WasSeen {
            metrics::counter!(metric_names::BRIDGE_DUPLICATES).increment(1);
            let _ = bridge.spool.remove(&claimed);
            continue;
        }

        payloads.push(payload);
        let _ = bridge.spool.remove(&claimed);
    }
    payloads
}

/// Purge the whole spool when every remote node is back on the mesh.
/// Returns whether a purge happened.
pub fn purge_if_quiescent(bridge: &Bridge, status: &mut StatusReader) -> bool {
    let all_fast = match status.read() {
        Some(snapshot) => !snapshot.any_slow(),
        // No status yet: assume the monitor just has not spoken, not that
        // the mesh is healthy.
        None => return false,
    };
    if !all_fast {
        return false;
    }
    match bridge.spool.is_empty() {
        Ok(true) => false,
        Ok(false) => match bridge.spool.purge() {
            Ok(removed) => {
                metrics::counter!(metric_names::BRIDGE_PURGES).increment(1);
                info!(removed, "mesh healthy, spool purged");
                true
            }
            Err(e) => {
                warn!(error = %e, "quiescence purge failed");
                false
            }
        },
        Err(_) => false,
    }
}

/// Poll `incoming/` until shutdown, forwarding payloads to every
/// downstream group.
pub async fn egress_loop(
    bridge: Arc<Bridge>,
    socket: UdpSocket,
    downstream: Vec<SocketAddrV4>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut status = StatusReader::new(&bridge.status_path);
    let mut codec_warn = Throttle::per_minute();
    let mut io_warn = Throttle::per_minute();
    let mut send_warn = Throttle::per_minute();

    let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(groups = downstream.len(), "egress running");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                purge_if_quiescent(&bridge, &mut status);

                for payload in drain_incoming(&bridge, &mut codec_warn, &mut io_warn) {
                    for group in &downstream {
                        match socket.send_to(&payload, std::net::SocketAddr::V4(*group)).await {
                            Ok(_) => {
                                metrics::counter!(metric_names::BRIDGE_DELIVERED).increment(1);
                                debug!(group = %group, bytes = payload.len(), "forwarded downstream");
                            }
                            Err(e) => {
                                if let Some(suppressed) = send_warn.allow() {
                                    warn!(group = %group, error = %e, suppressed, "downstream send failed");
                                }
                            }
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!("egress stopping");
                break;
            }
        }
    }
}

//! In-process overlay driver.
//!
//! `MemoryHub` hosts any number of overlay nodes inside one process and
//! routes announces and packets between them. It exists for tests and
//! single-host bring-up; a radio driver implements [`OverlayTransport`]
//! against the real overlay library instead.
//!
//! The hub reproduces one load-bearing behaviour of the real library:
//! delivery receipts are queued per peer and released to the sender only
//! when the sender touches `recall_identity` for that peer. A hub built
//! with [`MemoryHub::prompt_free`] releases receipts immediately instead.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::error::OvnError;
use crate::identity::{derive_destination_hash, DestinationHash, Identity, Keypair};
use crate::transport::{OverlayTransport, OvnEvent, ReceiptId};

/// An in-process overlay shared by several nodes.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

struct HubInner {
    nodes: HashMap<DestinationHash, NodeSlot>,
    silent: HashSet<DestinationHash>,
    next_receipt: ReceiptId,
    prompt_free: bool,
}

struct NodeSlot {
    identity: Identity,
    app_name: String,
    aspect: String,
    event_tx: mpsc::UnboundedSender<OvnEvent>,
    /// Receipts owed to this node, released when it touches
    /// `recall_identity` for the matching peer.
    held: Vec<HeldReceipt>,
}

struct HeldReceipt {
    peer: DestinationHash,
    receipt: ReceiptId,
    sent_at: Instant,
}

impl MemoryHub {
    /// A hub with realistic receipt semantics: receipts wait until the
    /// sender prompts for the relevant peer.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A hub that releases receipts as soon as packets land. Useful where a
    /// test is not about receipt timing.
    pub fn prompt_free() -> Self {
        Self::build(true)
    }

    fn build(prompt_free: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                nodes: HashMap::new(),
                silent: HashSet::new(),
                next_receipt: 1,
                prompt_free,
            })),
        }
    }

    /// Register a node under an application namespace.
    ///
    /// Returns the node's transport handle and its event stream.
    pub fn join(
        &self,
        keypair: &Keypair,
        app_name: &str,
        aspect: &str,
    ) -> (MemoryTransport, mpsc::UnboundedReceiver<OvnEvent>) {
        let identity = keypair.identity();
        let destination = derive_destination_hash(&identity, app_name, aspect);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut inner = self.inner.lock().expect("hub lock");
        tracing::debug!(destination = %destination, app = app_name, aspect, "node joined hub");
        inner.nodes.insert(
            destination,
            NodeSlot {
                identity,
                app_name: app_name.to_owned(),
                aspect: aspect.to_owned(),
                event_tx,
                held: Vec::new(),
            },
        );

        let transport = MemoryTransport {
            inner: self.inner.clone(),
            local: destination,
        };
        (transport, event_rx)
    }

    /// Make a node deaf and mute: packets to it vanish and every send to it
    /// resolves as a timeout. Announces still reach it.
    pub fn set_silent(&self, destination: DestinationHash, silent: bool) {
        let mut inner = self.inner.lock().expect("hub lock");
        if silent {
            inner.silent.insert(destination);
        } else {
            inner.silent.remove(&destination);
        }
    }

    /// Remove a node entirely, as if its process died.
    pub fn drop_node(&self, destination: &DestinationHash) {
        let mut inner = self.inner.lock().expect("hub lock");
        inner.nodes.remove(destination);
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's handle onto a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Mutex<HubInner>>,
    local: DestinationHash,
}

impl OverlayTransport for MemoryTransport {
    fn local_destination(&self) -> DestinationHash {
        self.local
    }

    fn announce(&self, app_data: &[u8]) -> Result<(), OvnError> {
        let inner = self.inner.lock().expect("hub lock");
        let our = inner
            .nodes
            .get(&self.local)
            .ok_or(OvnError::Shutdown)?;
        let (app_name, aspect) = (our.app_name.clone(), our.aspect.clone());
        let identity = our.identity.clone();

        // Announces flood: every node in the namespace hears them, the
        // announcer included (rebroadcast paths do this on real meshes).
        for slot in inner.nodes.values() {
            if slot.app_name == app_name && slot.aspect == aspect {
                let _ = slot.event_tx.send(OvnEvent::Announce {
                    destination_hash: self.local,
                    identity: identity.clone(),
                    app_data: app_data.to_vec(),
                });
            }
        }
        Ok(())
    }

    fn recall_identity(&self, destination: &DestinationHash) -> Option<Identity> {
        let mut inner = self.inner.lock().expect("hub lock");

        // The touch pumps the event queue: receipts held for this peer are
        // released to us now, with the RTT they accumulated while waiting.
        if let Some(our) = inner.nodes.get_mut(&self.local) {
            let mut released = Vec::new();
            our.held.retain(|held| {
                if held.peer == *destination {
                    released.push((held.receipt, held.sent_at.elapsed()));
                    false
                } else {
                    true
                }
            });
            for (receipt, rtt) in released {
                let _ = our.event_tx.send(OvnEvent::Delivered { receipt, rtt });
            }
        }

        inner
            .nodes
            .get(destination)
            .map(|slot| slot.identity.clone())
    }

    fn send_with_receipt(
        &self,
        destination: &DestinationHash,
        payload: &[u8],
        _timeout: Duration,
    ) -> Result<ReceiptId, OvnError> {
        let mut inner = self.inner.lock().expect("hub lock");

        if !inner.nodes.contains_key(destination) {
            return Err(OvnError::UnknownDestination(*destination));
        }

        let receipt = inner.next_receipt;
        inner.next_receipt += 1;

        if inner.silent.contains(destination) {
            // The packet is lost; surface the timeout right away rather than
            // making tests wait out a radio-scale timer.
            if let Some(our) = inner.nodes.get(&self.local) {
                let _ = our.event_tx.send(OvnEvent::Timedout { receipt });
            }
            return Ok(receipt);
        }

        if let Some(dest) = inner.nodes.get(destination) {
            let _ = dest.event_tx.send(OvnEvent::PacketReceived {
                payload: payload.to_vec(),
            });
        }

        let prompt_free = inner.prompt_free;
        if let Some(our) = inner.nodes.get_mut(&self.local) {
            if prompt_free {
                let _ = our.event_tx.send(OvnEvent::Delivered {
                    receipt,
                    rtt: Duration::from_millis(1),
                });
            } else {
                our.held.push(HeldReceipt {
                    peer: *destination,
                    receipt,
                    sent_at: Instant::now(),
                });
            }
        }

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = "atak";
    const ASPECT: &str = "cot";

    fn join(hub: &MemoryHub, seed: u8) -> (MemoryTransport, mpsc::UnboundedReceiver<OvnEvent>) {
        hub.join(&Keypair::from_seed(&[seed; 32]), APP, ASPECT)
    }

    #[tokio::test]
    async fn announce_reaches_other_nodes() {
        let hub = MemoryHub::new();
        let (a, _a_rx) = join(&hub, 1);
        let (_b, mut b_rx) = join(&hub, 2);

        a.announce(b"alpha").unwrap();

        match b_rx.recv().await.unwrap() {
            OvnEvent::Announce { destination_hash, app_data, .. } => {
                assert_eq!(destination_hash, a.local_destination());
                assert_eq!(app_data, b"alpha");
            }
            other => panic!("expected announce, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn announce_echoes_to_self() {
        let hub = MemoryHub::new();
        let (a, mut a_rx) = join(&hub, 1);

        a.announce(b"alpha").unwrap();

        match a_rx.recv().await.unwrap() {
            OvnEvent::Announce { destination_hash, .. } => {
                assert_eq!(destination_hash, a.local_destination());
            }
            other => panic!("expected announce, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn packet_lands_and_receipt_waits_for_prompt() {
        let hub = MemoryHub::new();
        let (a, mut a_rx) = join(&hub, 1);
        let (b, mut b_rx) = join(&hub, 2);

        let receipt = a
            .send_with_receipt(&b.local_destination(), b"payload", Duration::from_secs(300))
            .unwrap();

        match b_rx.recv().await.unwrap() {
            OvnEvent::PacketReceived { payload } => assert_eq!(payload, b"payload"),
            other => panic!("expected packet, got {other:?}"),
        }

        // No receipt yet — the hub holds it until we touch the peer.
        assert!(a_rx.try_recv().is_err());

        a.recall_identity(&b.local_destination());
        match a_rx.recv().await.unwrap() {
            OvnEvent::Delivered { receipt: got, .. } => assert_eq!(got, receipt),
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn prompt_free_hub_confirms_immediately() {
        let hub = MemoryHub::prompt_free();
        let (a, mut a_rx) = join(&hub, 1);
        let (b, _b_rx) = join(&hub, 2);

        let receipt = a
            .send_with_receipt(&b.local_destination(), b"x", Duration::from_secs(300))
            .unwrap();

        match a_rx.recv().await.unwrap() {
            OvnEvent::Delivered { receipt: got, .. } => assert_eq!(got, receipt),
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_node_times_out() {
        let hub = MemoryHub::new();
        let (a, mut a_rx) = join(&hub, 1);
        let (b, mut b_rx) = join(&hub, 2);
        hub.set_silent(b.local_destination(), true);

        let receipt = a
            .send_with_receipt(&b.local_destination(), b"x", Duration::from_secs(300))
            .unwrap();

        match a_rx.recv().await.unwrap() {
            OvnEvent::Timedout { receipt: got } => assert_eq!(got, receipt),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_destination_is_an_error() {
        let hub = MemoryHub::new();
        let (a, _a_rx) = join(&hub, 1);
        let stranger = DestinationHash::from_bytes([9u8; 16]);

        let err = a
            .send_with_receipt(&stranger, b"x", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, OvnError::UnknownDestination(_)));
    }

    #[tokio::test]
    async fn recall_returns_identity_of_known_peer() {
        let hub = MemoryHub::new();
        let (a, _a_rx) = join(&hub, 1);
        let (b, _b_rx) = join(&hub, 2);

        let recalled = a.recall_identity(&b.local_destination()).unwrap();
        assert_eq!(recalled, Keypair::from_seed(&[2; 32]).identity());

        hub.drop_node(&b.local_destination());
        assert!(a.recall_identity(&b.local_destination()).is_none());
    }
}

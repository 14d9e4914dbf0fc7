//! The `OverlayTransport` capability surface.
//!
//! The underlying overlay library drives announce, delivery and timeout
//! callbacks from its own threads. Drivers translate those callbacks into
//! [`OvnEvent`]s on an mpsc channel handed out at registration, so the
//! consuming component applies them from its single main loop instead of
//! mutating shared state from foreign threads.

use std::time::Duration;

use crate::error::OvnError;
use crate::identity::{DestinationHash, Identity};

/// Handle correlating a sent packet with its later delivery or timeout
/// event.
pub type ReceiptId = u64;

/// Events surfaced by an overlay driver.
#[derive(Debug, Clone)]
pub enum OvnEvent {
    /// A peer announced itself. `destination_hash` is the opaque endpoint
    /// token to store and route by — it is not derivable from `identity`.
    Announce {
        destination_hash: DestinationHash,
        identity: Identity,
        app_data: Vec<u8>,
    },
    /// A packet arrived for our inbound destination.
    PacketReceived { payload: Vec<u8> },
    /// A previously sent packet was confirmed delivered.
    Delivered { receipt: ReceiptId, rtt: Duration },
    /// A previously sent packet timed out without confirmation.
    Timedout { receipt: ReceiptId },
}

/// Capabilities the overlay library exposes to taklink.
///
/// One inbound destination per handle, registered under an application
/// namespace (`app_name.aspect`) at construction. Implementations must be
/// callable from any thread.
pub trait OverlayTransport: Send + Sync {
    /// The endpoint token our announces carry and peers send to.
    fn local_destination(&self) -> DestinationHash;

    /// Broadcast an announce carrying opaque application data.
    fn announce(&self, app_data: &[u8]) -> Result<(), OvnError>;

    /// Look up the public identity behind a destination, if the library has
    /// seen it. Touching this accessor also gives the library's event queue
    /// a chance to surface receipts pending for that peer — callers rely on
    /// this to keep confirmation round-trips short.
    fn recall_identity(&self, destination: &DestinationHash) -> Option<Identity>;

    /// Send one packet to a destination, requesting delivery confirmation.
    /// The returned receipt resolves later as a `Delivered` or `Timedout`
    /// event; `timeout` bounds how long the library waits for proof.
    fn send_with_receipt(
        &self,
        destination: &DestinationHash,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<ReceiptId, OvnError>;
}

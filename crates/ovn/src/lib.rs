//! ovn — overlay-network transport seam.
//!
//! The cryptographic overlay radio plane is an external system. This crate
//! defines the capability surface the rest of taklink consumes, and ships an
//! in-process driver for tests and single-host bring-up.
//!
//! # Architecture
//!
//! - **identity**: Ed25519 node identity and opaque destination hashes
//! - **transport**: the `OverlayTransport` trait and the `OvnEvent` stream
//! - **memory**: `MemoryHub`, an in-process multi-node driver
//!
//! Announce, delivery and timeout callbacks of the underlying library are
//! surfaced as [`OvnEvent`]s on an mpsc channel, consumed by the owning
//! component's main loop.

pub mod error;
pub mod identity;
pub mod memory;
pub mod transport;

pub use error::OvnError;
pub use identity::{DestinationHash, Identity, Keypair};
pub use memory::{MemoryHub, MemoryTransport};
pub use transport::{OverlayTransport, OvnEvent, ReceiptId};

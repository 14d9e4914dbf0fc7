//! Metric name constants.
//!
//! Call sites use these constants rather than raw strings to prevent typos
//! and keep renaming centralized. No exporter lives in this repo; the
//! recorder is whatever the deployment installs.

/// Payloads offered to the codec.
pub const CODEC_PAYLOADS: &str = "taklink_codec_payloads_total";
/// Payloads that compressed within the packet cap.
pub const CODEC_COMPRESSED: &str = "taklink_codec_compressed_total";
/// Payloads refused for exceeding the packet cap.
pub const CODEC_OVERSIZED: &str = "taklink_codec_oversized_total";

/// Datagrams dropped as duplicates (either direction).
pub const BRIDGE_DUPLICATES: &str = "taklink_bridge_duplicates_total";
/// Datagrams forwarded to local multicast.
pub const BRIDGE_DELIVERED: &str = "taklink_bridge_delivered_total";
/// Spool purges triggered by quiescence.
pub const BRIDGE_PURGES: &str = "taklink_bridge_purges_total";

/// Overlay packets transmitted (first sends and retries).
pub const OVN_SENDS: &str = "taklink_ovn_sends_total";
/// Retransmissions specifically.
pub const OVN_RETRIES: &str = "taklink_ovn_retries_total";
/// Delivery confirmations received.
pub const OVN_DELIVERED: &str = "taklink_ovn_delivered_total";
/// Files dropped after exhausting the retry budget.
pub const OVN_EXHAUSTED: &str = "taklink_ovn_exhausted_total";

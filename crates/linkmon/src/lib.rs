//! linkmon — the link-quality monitor.
//!
//! Samples layer-2 mesh telemetry once per second, applies hysteresis per
//! remote node, and publishes `node_status.json` for the other daemons.
//!
//! - **telemetry**: the `TelemetrySource` seam and the batctl adapter
//! - **monitor**: the per-node counters and FAST/SLOW state machine

pub mod monitor;
pub mod telemetry;

pub use monitor::LinkMonitor;
pub use telemetry::{BatctlSource, OgmSample, ScriptedSource, TelemetrySource};

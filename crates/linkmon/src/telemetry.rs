//! Mesh telemetry sources.
//!
//! Only the telemetry *shape* is fixed: one sample per currently visible
//! originator, with seconds-since-last-OGM, best-path throughput and next
//! hop. Which routing daemon produces it is an adapter detail behind
//! [`TelemetrySource`]; the shipped adapter parses `batctl o`. Tests use a
//! scripted source.

use std::io;

use taklink_core::Throttle;

/// One originator's telemetry at sampling time.
#[derive(Debug, Clone, PartialEq)]
pub struct OgmSample {
    pub mac: String,
    /// Seconds since the last originator message.
    pub last_seen_secs: f64,
    /// Best-path throughput estimate, Mbit/s.
    pub throughput_mbit: Option<f64>,
    pub nexthop: Option<String>,
}

/// A source of originator telemetry.
///
/// A failed collection returns an error; an empty vector is a valid answer
/// meaning no originator is currently visible. Callers treat both as "all
/// nodes unseen" for classification purposes but only log the former.
pub trait TelemetrySource: Send {
    fn sample(&mut self) -> io::Result<Vec<OgmSample>>;
}

/// Telemetry from BATMAN-adv via `batctl o`.
///
/// The shell-out blocks for a few milliseconds, which the 1 Hz cadence
/// absorbs.
pub struct BatctlSource {
    parse_warn: Throttle,
}

impl BatctlSource {
    pub fn new() -> Self {
        Self { parse_warn: Throttle::per_minute() }
    }
}

impl Default for BatctlSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySource for BatctlSource {
    fn sample(&mut self) -> io::Result<Vec<OgmSample>> {
        let output = std::process::Command::new("batctl").arg("o").output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "batctl exited with {}",
                output.status
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let mut samples = Vec::new();
        for line in text.lines() {
            // Only best-path rows carry the originator summary.
            if !line.contains(" * ") {
                continue;
            }
            match parse_originator_line(line) {
                Some(sample) => samples.push(sample),
                None => {
                    if let Some(suppressed) = self.parse_warn.allow() {
                        tracing::warn!(line, suppressed, "unparsable originator line");
                    }
                }
            }
        }
        Ok(samples)
    }
}

/// Parse one best-path originator row:
///
/// ```text
///  * aa:bb:cc:dd:ee:01    0.540s   (100.0) aa:bb:cc:dd:ee:02 [  wlan0]
/// ```
pub fn parse_originator_line(line: &str) -> Option<OgmSample> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    // "*", mac, "<secs>s", then throughput/nexthop.
    if parts.len() < 3 || parts[0] != "*" {
        return None;
    }
    let mac = parts[1].to_owned();
    let last_seen_secs: f64 = parts[2].strip_suffix('s')?.parse().ok()?;

    let throughput_mbit = line
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .and_then(|(inside, _)| inside.trim().parse().ok());
    let nexthop = line
        .split_once(')')
        .map(|(_, rest)| rest.split_whitespace())
        .and_then(|mut words| words.next())
        .map(str::to_owned);

    Some(OgmSample { mac, last_seen_secs, throughput_mbit, nexthop })
}

/// Fixed samples for tests and dry runs. Yields each round once, then an
/// empty mesh forever.
pub struct ScriptedSource {
    rounds: std::vec::IntoIter<Vec<OgmSample>>,
}

impl ScriptedSource {
    pub fn new(rounds: Vec<Vec<OgmSample>>) -> Self {
        Self { rounds: rounds.into_iter() }
    }
}

impl TelemetrySource for ScriptedSource {
    fn sample(&mut self) -> io::Result<Vec<OgmSample>> {
        Ok(self.rounds.next().unwrap_or_default())
    }
}

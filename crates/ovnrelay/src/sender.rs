//! The reliable overlay sender.
//!
//! A 1 Hz loop drains `pending/` toward every slow, discovered peer,
//! spaces all radio transmissions by the pacing gate, retries unconfirmed
//! files on the backoff schedule, and deletes a file once every target
//! confirmed or exhausted its budget. Transport events (announces,
//! inbound packets, receipts) arrive on the same loop, so the ledger is
//! only ever touched from here.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ovn::{OverlayTransport, OvnEvent};
use taklink_core::{clock, metric_names, Config, Spool, Stage, StatusReader, Throttle};

use crate::delivery::DeliveryTable;
use crate::discovery::{AnnounceOutcome, PeerDiscovery};

/// Enforces the minimum spacing between any two radio transmissions.
#[derive(Debug)]
struct Pacer {
    spacing: Duration,
    last: Option<Instant>,
}

impl Pacer {
    fn new(spacing: Duration) -> Self {
        Self { spacing, last: None }
    }

    /// Whether a send may start right now.
    fn ready(&self) -> bool {
        self.last.is_none_or(|last| last.elapsed() >= self.spacing)
    }

    /// Wait out the remaining spacing, then claim the slot.
    async fn pace(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.spacing {
                tokio::time::sleep(self.spacing - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

/// The PDS+ROS service: owns the ledger, the spool handle and the pacing
/// state.
pub struct Relay {
    config: Config,
    transport: Arc<dyn OverlayTransport>,
    discovery: Arc<PeerDiscovery>,
    spool: Spool,
    status: StatusReader,
    table: DeliveryTable,
    pacer: Pacer,
    tick_interval: Duration,
    hostname: String,
    io_warn: Throttle,
    send_warn: Throttle,
}

impl Relay {
    pub fn new(
        config: Config,
        transport: Arc<dyn OverlayTransport>,
        discovery: Arc<PeerDiscovery>,
    ) -> std::io::Result<Self> {
        let spool = Spool::open(config.spool_dir())?;
        let status = StatusReader::new(config.node_status_path());
        let table = DeliveryTable::new(config.retry);
        let pacer = Pacer::new(config.send_spacing);
        Ok(Self {
            config,
            transport,
            discovery,
            spool,
            status,
            table,
            pacer,
            tick_interval: Duration::from_secs(1),
            hostname: taklink_core::config::local_hostname(),
            io_warn: Throttle::per_minute(),
            send_warn: Throttle::per_minute(),
        })
    }

    /// Override the loop cadence. Tests run faster than 1 Hz.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Override the hostname used for responsive announces. Tests host
    /// several relays on one machine.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Run until shutdown. Transport events interleave with ticks on this
    /// one task.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<OvnEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                Some(event) = events.recv() => self.handle_event(event),
                _ = shutdown.changed() => {
                    info!("relay shutting down");
                    break;
                }
            }
        }
    }

    async fn tick(&mut self) {
        let slow: HashSet<String> = self
            .status
            .read()
            .map(|status| status.slow_hostnames().into_iter().collect())
            .unwrap_or_default();
        let discovered = self.discovery.hostnames();

        // The bridge may have purged the spool underneath us (quiescence);
        // forget ledger entries for files that no longer exist.
        match self.spool.list(Stage::SentBuffer) {
            Ok(files) => {
                let existing: HashSet<String> = files
                    .iter()
                    .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
                    .map(str::to_owned)
                    .collect();
                self.table.prune_missing(&existing);
            }
            Err(e) => {
                if let Some(suppressed) = self.io_warn.allow() {
                    warn!(error = %e, suppressed, "sent_buffer listing failed");
                }
            }
        }

        // Radio still cooling down from the previous tick: skip the send
        // phases, never queue against the gate from here.
        if self.pacer.ready() {
            self.first_send_pass(&slow, &discovered).await;
            self.retry_pass(&slow, &discovered).await;
        }

        self.prompt_pass();
        self.cleanup_pass();
    }

    /// Send every pending file to its full target set, then move it to
    /// `sent_buffer/`. Files without targets stay put.
    async fn first_send_pass(&mut self, slow: &HashSet<String>, discovered: &HashSet<String>) {
        let files = match self.spool.list(Stage::Pending) {
            Ok(files) => files,
            Err(e) => {
                if let Some(suppressed) = self.io_warn.allow() {
                    warn!(error = %e, suppressed, "pending listing failed");
                }
                return;
            }
        };

        for path in files {
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned)
            else {
                continue;
            };

            let mut targets: Vec<&String> =
                slow.intersection(discovered).collect();
            targets.sort();
            if targets.is_empty() {
                continue;
            }

            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    if let Some(suppressed) = self.io_warn.allow() {
                        warn!(file = %name, error = %e, suppressed, "pending read failed");
                    }
                    continue;
                }
            };

            let mut attempted = 0usize;
            for hostname in targets {
                let Some(destination) = self.discovery.lookup(hostname) else {
                    continue;
                };
                attempted += 1;
                self.pacer.pace().await;
                let now_ms = clock::unix_millis();
                match self.transport.send_with_receipt(
                    &destination,
                    &bytes,
                    self.config.packet_timeout,
                ) {
                    Ok(receipt) => {
                        metrics::counter!(metric_names::OVN_SENDS).increment(1);
                        info!(file = %name, peer = %hostname, bytes = bytes.len(), "sent");
                        self.table.record_send(&name, hostname, Some(receipt), now_ms);
                    }
                    Err(e) => {
                        // Counts as an attempt that will never confirm.
                        if let Some(suppressed) = self.send_warn.allow() {
                            warn!(peer = %hostname, error = %e, suppressed, "send failed");
                        }
                        self.table.record_send(&name, hostname, None, now_ms);
                    }
                }
            }

            // Every target vanished between snapshot and send: leave the
            // file for the next tick rather than parking it unattempted.
            if attempted == 0 {
                continue;
            }

            if let Err(e) = self.spool.promote(&path) {
                if let Some(suppressed) = self.io_warn.allow() {
                    warn!(file = %name, error = %e, suppressed, "promote failed");
                }
            }
        }
    }

    /// Re-send unconfirmed targets whose backoff ran out.
    async fn retry_pass(&mut self, slow: &HashSet<String>, discovered: &HashSet<String>) {
        let due = self.table.due_retries(clock::unix_millis(), slow, discovered);
        for (file, hostname) in due {
            let Some(destination) = self.discovery.lookup(&hostname) else {
                continue;
            };
            let path = self.spool.dir(Stage::SentBuffer).join(&file);
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    if let Some(suppressed) = self.io_warn.allow() {
                        warn!(file = %file, error = %e, suppressed, "sent_buffer read failed");
                    }
                    continue;
                }
            };

            self.pacer.pace().await;
            let now_ms = clock::unix_millis();
            match self.transport.send_with_receipt(
                &destination,
                &bytes,
                self.config.packet_timeout,
            ) {
                Ok(receipt) => {
                    metrics::counter!(metric_names::OVN_SENDS).increment(1);
                    metrics::counter!(metric_names::OVN_RETRIES).increment(1);
                    self.table.record_retry(&file, &hostname, Some(receipt), now_ms);
                    let attempt = self
                        .table
                        .target(&file, &hostname)
                        .map(|r| r.retry_count)
                        .unwrap_or_default();
                    info!(file = %file, peer = %hostname, attempt, "retransmitted");
                }
                Err(e) => {
                    if let Some(suppressed) = self.send_warn.allow() {
                        warn!(peer = %hostname, error = %e, suppressed, "retry send failed");
                    }
                    self.table.record_retry(&file, &hostname, None, now_ms);
                }
            }
        }
    }

    /// Touch the per-peer identity accessor for peers owing us receipts.
    /// The overlay's event queue only surfaces confirmations for a peer
    /// when its API is touched; without this, receipts arrive in late
    /// bursts.
    fn prompt_pass(&mut self) {
        for hostname in self.table.prompts_due(clock::unix_millis()) {
            if let Some(destination) = self.discovery.lookup(&hostname) {
                let _ = self.transport.recall_identity(&destination);
                debug!(peer = %hostname, "prompted for receipts");
            }
        }
    }

    /// Delete files whose every target settled, and their ledger entries.
    fn cleanup_pass(&mut self) {
        for file in self.table.completed_files() {
            if self.table.any_exhausted(&file) {
                metrics::counter!(metric_names::OVN_EXHAUSTED).increment(1);
                warn!(file = %file, "abandoned after retry budget");
            } else {
                debug!(file = %file, "all targets confirmed");
            }

            let path = self.spool.dir(Stage::SentBuffer).join(&file);
            if let Err(e) = self.spool.remove(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    if let Some(suppressed) = self.io_warn.allow() {
                        warn!(file = %file, error = %e, suppressed, "cleanup failed");
                    }
                }
            }
            self.table.remove_file(&file);
        }
    }

    fn handle_event(&mut self, event: OvnEvent) {
        match event {
            OvnEvent::Announce { destination_hash, app_data, .. } => {
                let outcome =
                    self.discovery
                        .handle_announce(destination_hash, &app_data, clock::unix_secs());
                if outcome == AnnounceOutcome::New {
                    self.respond_to_new_peer();
                }
            }
            OvnEvent::PacketReceived { payload } => {
                match self
                    .spool
                    .store(Stage::Incoming, &payload, clock::unix_millis())
                {
                    Ok(path) => {
                        info!(
                            bytes = payload.len(),
                            file = %path.display(),
                            "overlay payload spooled"
                        );
                    }
                    Err(e) => {
                        if let Some(suppressed) = self.io_warn.allow() {
                            warn!(error = %e, suppressed, "incoming spool write failed");
                        }
                    }
                }
            }
            OvnEvent::Delivered { receipt, rtt } => {
                if let Some((file, hostname)) =
                    self.table.on_delivered(receipt, rtt.as_millis() as u64)
                {
                    metrics::counter!(metric_names::OVN_DELIVERED).increment(1);
                    info!(
                        file = %file,
                        peer = %hostname,
                        rtt_ms = rtt.as_millis() as u64,
                        "delivery confirmed"
                    );
                }
            }
            OvnEvent::Timedout { receipt } => {
                if let Some((file, hostname)) = self.table.on_timeout(receipt) {
                    debug!(file = %file, peer = %hostname, "delivery timed out");
                }
            }
        }
    }

    /// Bootstrap bidirectional discovery: answer a first announce with our
    /// own, after a short random delay so simultaneous boots don't storm
    /// the radio.
    fn respond_to_new_peer(&self) {
        let transport = self.transport.clone();
        let hostname = self.hostname.clone();
        let delay_ms = rand::thread_rng().gen_range(500..=1500);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if let Err(e) = transport.announce(hostname.as_bytes()) {
                warn!(error = %e, "responsive announce failed");
            } else {
                debug!(delay_ms, "responsive announce sent");
            }
        });
    }
}

//! The delivery ledger for files in `sent_buffer/`.
//!
//! Tracks, per (file, peer): when we sent, whether the peer confirmed, how
//! many retries we spent and when the next one is due. Pure bookkeeping —
//! the sender loop reads the clock and does the I/O; everything here takes
//! `now_ms` as a parameter.
//!
//! A file's ledger entry ends when every targeted peer either confirmed or
//! exhausted the retry budget; the sender then deletes the file.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::Rng;

use ovn::ReceiptId;
use taklink_core::config::RetryPolicy;

/// Prompt the overlay for pending receipts at most this often per peer.
pub const RECEIPT_PROMPT_INTERVAL_MS: i64 = 5_000;

/// Delivery state for one (file, peer) pair.
#[derive(Debug, Clone)]
pub struct TargetRecord {
    pub sent_at: i64,
    pub delivered: bool,
    pub retry_count: u32,
    pub next_eligible_at: i64,
    pub last_receipt_prompt: i64,
    pub rtt_ms: Option<u64>,
}

/// The full ledger: files (oldest-first by name) → targets (sorted by
/// hostname). Both orders are load-bearing: they fix the deterministic
/// send order.
#[derive(Debug)]
pub struct DeliveryTable {
    policy: RetryPolicy,
    files: BTreeMap<String, BTreeMap<String, TargetRecord>>,
    receipts: HashMap<ReceiptId, (String, String)>,
}

impl DeliveryTable {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, files: BTreeMap::new(), receipts: HashMap::new() }
    }

    /// Record a first send to one target. A `None` receipt means the send
    /// failed synchronously; that counts as an attempt whose confirmation
    /// will never come, so the retry schedule starts the same way.
    pub fn record_send(
        &mut self,
        file: &str,
        hostname: &str,
        receipt: Option<ReceiptId>,
        now_ms: i64,
    ) {
        let record = TargetRecord {
            sent_at: now_ms,
            delivered: false,
            retry_count: 0,
            next_eligible_at: now_ms + self.jittered_delay_ms(0),
            last_receipt_prompt: now_ms,
            rtt_ms: None,
        };
        self.files
            .entry(file.to_owned())
            .or_default()
            .insert(hostname.to_owned(), record);
        if let Some(receipt) = receipt {
            self.receipts.insert(receipt, (file.to_owned(), hostname.to_owned()));
        }
    }

    /// Record a retry send. Advances the attempt counter and schedules the
    /// next eligibility with backoff and jitter.
    pub fn record_retry(
        &mut self,
        file: &str,
        hostname: &str,
        receipt: Option<ReceiptId>,
        now_ms: i64,
    ) {
        if let Some(attempts) = self.target(file, hostname).map(|r| r.retry_count + 1) {
            let delay = self.jittered_delay_ms(attempts);
            if let Some(record) = self.target_mut(file, hostname) {
                record.retry_count = attempts;
                record.sent_at = now_ms;
                record.next_eligible_at = now_ms + delay;
            }
        }
        if let Some(receipt) = receipt {
            self.receipts.insert(receipt, (file.to_owned(), hostname.to_owned()));
        }
    }

    /// Targets due for a retry: still slow, still discovered, unconfirmed,
    /// within budget, and past their eligibility time. Ordered oldest file
    /// first, then by hostname.
    pub fn due_retries(
        &self,
        now_ms: i64,
        slow: &HashSet<String>,
        discovered: &HashSet<String>,
    ) -> Vec<(String, String)> {
        let mut due = Vec::new();
        for (file, targets) in &self.files {
            for (hostname, record) in targets {
                if !record.delivered
                    && record.retry_count < self.policy.max_attempts
                    && record.next_eligible_at <= now_ms
                    && slow.contains(hostname)
                    && discovered.contains(hostname)
                {
                    due.push((file.clone(), hostname.clone()));
                }
            }
        }
        due
    }

    /// Peers owed a receipt prompt: at least one sent-but-unconfirmed
    /// target and no prompt within the rate-limit window. Marks the prompt
    /// time on every matching record so the per-peer limit holds across
    /// files.
    pub fn prompts_due(&mut self, now_ms: i64) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        for targets in self.files.values() {
            for (hostname, record) in targets {
                if !record.delivered
                    && now_ms - record.last_receipt_prompt >= RECEIPT_PROMPT_INTERVAL_MS
                    && !hosts.contains(hostname)
                {
                    hosts.push(hostname.clone());
                }
            }
        }
        for targets in self.files.values_mut() {
            for (hostname, record) in targets.iter_mut() {
                if hosts.contains(hostname) && !record.delivered {
                    record.last_receipt_prompt = now_ms;
                }
            }
        }
        hosts.sort();
        hosts
    }

    /// Apply a delivery confirmation. A confirmation that arrives after a
    /// timeout still counts; any scheduled retry becomes a no-op.
    pub fn on_delivered(&mut self, receipt: ReceiptId, rtt_ms: u64) -> Option<(String, String)> {
        let (file, hostname) = self.receipts.remove(&receipt)?;
        if let Some(record) = self.target_mut(&file, &hostname) {
            record.delivered = true;
            record.rtt_ms = Some(rtt_ms);
        }
        Some((file, hostname))
    }

    /// Apply a timeout. The record stays unconfirmed; the retry pass
    /// decides what happens next.
    pub fn on_timeout(&mut self, receipt: ReceiptId) -> Option<(String, String)> {
        self.receipts.remove(&receipt)
    }

    /// Files whose every target confirmed or ran out the budget. The
    /// sender deletes these and calls [`Self::remove_file`].
    pub fn completed_files(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|(_, targets)| {
                !targets.is_empty()
                    && targets.values().all(|r| {
                        r.delivered || r.retry_count >= self.policy.max_attempts
                    })
            })
            .map(|(file, _)| file.clone())
            .collect()
    }

    /// Whether any target of the file exhausted its budget unconfirmed.
    pub fn any_exhausted(&self, file: &str) -> bool {
        self.files.get(file).is_some_and(|targets| {
            targets
                .values()
                .any(|r| !r.delivered && r.retry_count >= self.policy.max_attempts)
        })
    }

    pub fn remove_file(&mut self, file: &str) {
        self.files.remove(file);
        self.receipts.retain(|_, (f, _)| f.as_str() != file);
    }

    /// Drop records for files no longer on disk (quiescence purges the
    /// spool underneath us).
    pub fn prune_missing(&mut self, existing: &HashSet<String>) {
        self.files.retain(|file, _| existing.contains(file));
        self.receipts.retain(|_, (f, _)| existing.contains(f.as_str()));
    }

    pub fn target(&self, file: &str, hostname: &str) -> Option<&TargetRecord> {
        self.files.get(file)?.get(hostname)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn target_mut(&mut self, file: &str, hostname: &str) -> Option<&mut TargetRecord> {
        self.files.get_mut(file)?.get_mut(hostname)
    }

    /// Backoff delay before attempt `retry_count + 1`, without jitter.
    fn base_delay_ms(&self, retry_count: u32) -> i64 {
        let initial = self.policy.initial_delay.as_millis() as i64;
        let max = self.policy.max_delay.as_millis() as i64;
        let factor = i64::from(self.policy.backoff_factor);
        let mut delay = initial;
        for _ in 0..retry_count {
            delay = delay.saturating_mul(factor);
            if delay >= max {
                return max;
            }
        }
        delay.min(max)
    }

    fn jittered_delay_ms(&self, retry_count: u32) -> i64 {
        let base = self.base_delay_ms(retry_count) as f64;
        let jitter = self.policy.jitter;
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        (base * factor) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter_policy() -> RetryPolicy {
        RetryPolicy { jitter: 0.0, ..RetryPolicy::default() }
    }

    fn table() -> DeliveryTable {
        DeliveryTable::new(no_jitter_policy())
    }

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn first_send_schedules_initial_backoff() {
        let mut t = table();
        t.record_send("0001.zst", "node-b", Some(1), 0);
        let record = t.target("0001.zst", "node-b").unwrap();
        assert_eq!(record.retry_count, 0);
        assert!(!record.delivered);
        assert_eq!(record.next_eligible_at, 25_000);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let t = table();
        assert_eq!(t.base_delay_ms(0), 25_000);
        assert_eq!(t.base_delay_ms(1), 50_000);
        assert_eq!(t.base_delay_ms(2), 100_000);
        assert_eq!(t.base_delay_ms(3), 120_000); // 200s capped
        assert_eq!(t.base_delay_ms(4), 120_000);
        assert_eq!(t.base_delay_ms(10), 120_000);
    }

    #[test]
    fn jitter_stays_within_band() {
        let policy = RetryPolicy { jitter: 0.1, ..RetryPolicy::default() };
        let t = DeliveryTable::new(policy);
        for _ in 0..200 {
            let delay = t.jittered_delay_ms(0);
            assert!((22_500..=27_500).contains(&delay), "delay {delay} out of band");
        }
    }

    #[test]
    fn retry_is_due_only_when_eligible_slow_and_discovered() {
        let mut t = table();
        t.record_send("0001.zst", "node-b", Some(1), 0);

        let slow = set(&["node-b"]);
        let known = set(&["node-b"]);

        assert!(t.due_retries(24_999, &slow, &known).is_empty());
        assert_eq!(
            t.due_retries(25_000, &slow, &known),
            vec![("0001.zst".to_owned(), "node-b".to_owned())]
        );
        // A recovered (fast) or vanished peer is not retried.
        assert!(t.due_retries(25_000, &set(&[]), &known).is_empty());
        assert!(t.due_retries(25_000, &slow, &set(&[])).is_empty());
    }

    #[test]
    fn retry_budget_is_bounded() {
        let mut t = table();
        t.record_send("0001.zst", "node-b", Some(1), 0);
        let slow = set(&["node-b"]);

        let mut now = 0;
        for attempt in 1..=5 {
            now += 200_000; // far past any backoff
            assert_eq!(t.due_retries(now, &slow, &slow).len(), 1, "attempt {attempt}");
            t.record_retry("0001.zst", "node-b", Some(attempt), now);
        }
        // Budget spent: never due again.
        assert!(t.due_retries(now + 500_000, &slow, &slow).is_empty());
        assert_eq!(t.target("0001.zst", "node-b").unwrap().retry_count, 5);
        assert_eq!(t.completed_files(), vec!["0001.zst"]);
        assert!(t.any_exhausted("0001.zst"));
    }

    #[test]
    fn delivery_ends_retries_even_after_timeout() {
        let mut t = table();
        t.record_send("0001.zst", "node-b", Some(7), 0);

        // Timeout first, then a late confirmation for a later attempt.
        assert_eq!(t.on_timeout(7).unwrap().1, "node-b");
        t.record_retry("0001.zst", "node-b", Some(8), 25_000);
        let (_, host) = t.on_delivered(8, 1_200).unwrap();
        assert_eq!(host, "node-b");

        let record = t.target("0001.zst", "node-b").unwrap();
        assert!(record.delivered);
        assert_eq!(record.rtt_ms, Some(1_200));
        assert!(t
            .due_retries(i64::MAX, &set(&["node-b"]), &set(&["node-b"]))
            .is_empty());
        assert_eq!(t.completed_files(), vec!["0001.zst"]);
        assert!(!t.any_exhausted("0001.zst"));
    }

    #[test]
    fn file_completes_only_when_every_target_settles() {
        let mut t = table();
        t.record_send("0001.zst", "node-b", Some(1), 0);
        t.record_send("0001.zst", "node-c", Some(2), 0);

        t.on_delivered(1, 900);
        assert!(t.completed_files().is_empty());

        t.on_delivered(2, 1_100);
        assert_eq!(t.completed_files(), vec!["0001.zst"]);

        t.remove_file("0001.zst");
        assert!(t.is_empty());
    }

    #[test]
    fn prompts_rate_limit_per_peer_across_files() {
        let mut t = table();
        t.record_send("0001.zst", "node-b", Some(1), 0);
        t.record_send("0002.zst", "node-b", Some(2), 0);
        t.record_send("0002.zst", "node-c", Some(3), 0);

        // Nothing due inside the window.
        assert!(t.prompts_due(4_999).is_empty());

        // One prompt per peer, not per file.
        assert_eq!(t.prompts_due(5_000), vec!["node-b", "node-c"]);
        assert!(t.prompts_due(9_999).is_empty());
        assert_eq!(t.prompts_due(10_000), vec!["node-b", "node-c"]);
    }

    #[test]
    fn delivered_targets_are_not_prompted() {
        let mut t = table();
        t.record_send("0001.zst", "node-b", Some(1), 0);
        t.on_delivered(1, 800);
        assert!(t.prompts_due(60_000).is_empty());
    }

    #[test]
    fn failed_send_counts_as_attempt_without_receipt() {
        let mut t = table();
        t.record_send("0001.zst", "node-b", None, 0);
        let record = t.target("0001.zst", "node-b").unwrap();
        assert_eq!(record.retry_count, 0);
        // The schedule advanced exactly as if the packet were in flight.
        assert_eq!(record.next_eligible_at, 25_000);
    }

    #[test]
    fn purge_underneath_drops_records() {
        let mut t = table();
        t.record_send("0001.zst", "node-b", Some(1), 0);
        t.record_send("0002.zst", "node-b", Some(2), 0);

        t.prune_missing(&set(&["0002.zst"]));
        assert!(t.target("0001.zst", "node-b").is_none());
        assert!(t.target("0002.zst", "node-b").is_some());
        // The orphaned receipt is gone too: a late confirmation is a no-op.
        assert!(t.on_delivered(1, 500).is_none());
    }
}

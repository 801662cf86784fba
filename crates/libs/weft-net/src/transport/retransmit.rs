use std::collections::VecDeque;
use std::time::{Duration, Instant};

use weft_core::hash::AddressHash;

pub struct PendingSend {
    pub iface: AddressHash,
    pub raw: Vec<u8>,
    pub attempts: u8,
    pub backoff: Duration,
    pub next_attempt: Instant,
}

/// Packets whose interface send failed, retried with doubling backoff up
/// to a cap; a packet that exhausts its budget is dropped and reported.
pub struct RetransmitQueue {
    base_backoff: Duration,
    backoff_cap: Duration,
    budget: u8,
    pending: VecDeque<PendingSend>,
}

impl RetransmitQueue {
    pub fn new(base_backoff: Duration, backoff_cap: Duration, budget: u8) -> Self {
        Self { base_backoff, backoff_cap, budget, pending: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn enqueue(&mut self, iface: AddressHash, raw: Vec<u8>, now: Instant) {
        log::debug!("retransmit: queueing {} bytes for {}", raw.len(), iface);
        self.pending.push_back(PendingSend {
            iface,
            raw,
            attempts: 0,
            backoff: self.base_backoff,
            next_attempt: now + self.base_backoff,
        });
    }

    /// Pops every entry whose backoff elapsed. The caller re-sends each and
    /// feeds failures back through [`RetransmitQueue::requeue`].
    pub fn due(&mut self, now: Instant) -> Vec<PendingSend> {
        let mut due = Vec::new();
        let mut keep = VecDeque::with_capacity(self.pending.len());

        while let Some(entry) = self.pending.pop_front() {
            if entry.next_attempt <= now {
                due.push(entry);
            } else {
                keep.push_back(entry);
            }
        }

        self.pending = keep;
        due
    }

    /// Returns a failed entry to the queue with doubled backoff, or gives
    /// it up once the retry budget is spent. `Some` carries the dropped
    /// entry for the caller's drop callback.
    pub fn requeue(&mut self, mut entry: PendingSend, now: Instant) -> Option<PendingSend> {
        entry.attempts = entry.attempts.saturating_add(1);

        if entry.attempts >= self.budget {
            log::warn!(
                "retransmit: dropping packet for {} after {} attempts",
                entry.iface,
                entry.attempts,
            );
            return Some(entry);
        }

        entry.backoff = (entry.backoff * 2).min(self.backoff_cap);
        entry.next_attempt = now + entry.backoff;
        self.pending.push_back(entry);

        None
    }
}

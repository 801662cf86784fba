use std::collections::HashMap;
use std::time::{Duration, Instant};

use weft_core::hash::Hash;

pub const SEGMENT_TIMEOUT: Duration = Duration::from_secs(600);

/// Fired once with the concatenated payload and the original hash.
pub type AccumulatedCallback = Box<dyn FnMut(Vec<u8>, Hash) + Send>;

/// Optional per-segment progress notification `(index, total, original_hash)`.
pub type SegmentCallback = Box<dyn FnMut(u16, u16, Hash) + Send>;

/// A completed Resource transfer as seen by the accumulator. Multi-segment
/// resources share `original_hash` and carry a 1-based `segment_index`.
pub struct ResourceSegment {
    pub hash: Hash,
    pub original_hash: Option<Hash>,
    pub is_segmented: bool,
    pub segment_index: u16,
    pub total_segments: u16,
    pub data: Vec<u8>,
}

struct SegmentSlot {
    data: Vec<u8>,
    received: bool,
}

struct PendingTransfer {
    total_segments: u16,
    received_count: u16,
    segments: Vec<SegmentSlot>,
    started_at: Instant,
    last_activity: Instant,
}

/// Rebuilds large payloads that the sender split into independent Resource
/// segments. Keyed by the original hash; the transfer entry is removed
/// before the accumulated callback runs, so a re-entrant callback sees a
/// clean map.
pub struct SegmentAccumulator {
    pending: HashMap<Hash, PendingTransfer>,
    timeout: Duration,
    accumulated_callback: Option<AccumulatedCallback>,
    segment_callback: Option<SegmentCallback>,
}

impl SegmentAccumulator {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            timeout: SEGMENT_TIMEOUT,
            accumulated_callback: None,
            segment_callback: None,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_accumulated_callback(&mut self, callback: AccumulatedCallback) {
        self.accumulated_callback = Some(callback);
    }

    pub fn set_segment_callback(&mut self, callback: SegmentCallback) {
        self.segment_callback = Some(callback);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self, original_hash: &Hash) -> bool {
        self.pending.contains_key(original_hash)
    }

    /// Feeds one completed segment. Returns false for non-segmented
    /// resources, which the caller delivers directly.
    pub fn segment_completed(&mut self, segment: ResourceSegment, now: Instant) -> bool {
        if !segment.is_segmented {
            return false;
        }

        let key = segment.original_hash.unwrap_or(segment.hash);
        let index = segment.segment_index;
        let total = segment.total_segments;

        if total == 0 {
            log::warn!("accumulator: segment for {} claims zero total", key);
            return true;
        }

        let transfer = self.pending.entry(key).or_insert_with(|| {
            log::info!("accumulator: tracking {}-segment transfer {}", total, key);
            PendingTransfer {
                total_segments: total,
                received_count: 0,
                segments: (0..total).map(|_| SegmentSlot { data: Vec::new(), received: false }).collect(),
                started_at: now,
                last_activity: now,
            }
        });

        transfer.last_activity = now;

        if index < 1 || index > transfer.total_segments {
            log::warn!(
                "accumulator: segment index {} outside 1..={} for {}",
                index,
                transfer.total_segments,
                key
            );
            return true;
        }

        if total != transfer.total_segments {
            log::warn!(
                "accumulator: segment total {} disagrees with {} for {}",
                total,
                transfer.total_segments,
                key
            );
            return true;
        }

        let slot = &mut transfer.segments[(index - 1) as usize];
        if slot.received {
            log::debug!("accumulator: duplicate segment {} for {}", index, key);
            return true;
        }

        slot.data = segment.data;
        slot.received = true;
        transfer.received_count += 1;

        log::debug!(
            "accumulator: segment {}/{} for {} ({} received)",
            index,
            transfer.total_segments,
            key,
            transfer.received_count
        );

        if let Some(callback) = self.segment_callback.as_mut() {
            callback(index, total, key);
        }

        if transfer.received_count == transfer.total_segments {
            // Remove before the callback; it may re-enter the accumulator
            if let Some(transfer) = self.pending.remove(&key) {
                let payload = assemble(&transfer);

                log::info!(
                    "accumulator: assembled {} bytes from {} segments for {}",
                    payload.len(),
                    transfer.total_segments,
                    key
                );

                if let Some(callback) = self.accumulated_callback.as_mut() {
                    callback(payload, key);
                }
            }
        }

        true
    }

    /// Drops transfers with no activity inside the timeout window.
    pub fn check_timeouts(&mut self, now: Instant) {
        let timeout = self.timeout;
        self.pending.retain(|key, transfer| {
            let idle = now.duration_since(transfer.last_activity);
            if idle <= timeout {
                return true;
            }

            let missing: Vec<u16> = transfer
                .segments
                .iter()
                .enumerate()
                .filter(|(_, slot)| !slot.received)
                .map(|(i, _)| i as u16 + 1)
                .collect();
            log::warn!(
                "accumulator: transfer {} timed out after {:?} idle, missing segments {:?}",
                key,
                idle,
                missing
            );
            false
        });
    }

    pub fn cleanup(&mut self, original_hash: &Hash) {
        if self.pending.remove(original_hash).is_some() {
            log::debug!("accumulator: dropped transfer {}", original_hash);
        }
    }
}

impl Default for SegmentAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

fn assemble(transfer: &PendingTransfer) -> Vec<u8> {
    let total_size: usize = transfer.segments.iter().map(|slot| slot.data.len()).sum();
    let mut payload = Vec::with_capacity(total_size);
    for slot in &transfer.segments {
        payload.extend_from_slice(&slot.data);
    }
    payload
}

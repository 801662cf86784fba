use std::collections::HashMap;
use std::time::{Duration, Instant};

use weft_core::hash::AddressHash;

use crate::fragment::{parse, FragmentType};

pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Fired with `(peer_identity, assembled_packet)` when a packet completes.
pub type ReassemblyCallback = Box<dyn FnMut(AddressHash, Vec<u8>) + Send>;

/// Fired with `(peer_identity, reason)` when a session is abandoned.
pub type TimeoutCallback = Box<dyn FnMut(AddressHash, &str) + Send>;

/// What [`Reassembler::process_fragment`] did with a fragment.
#[derive(Debug, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Stored (or recognized as a duplicate); the packet is still open.
    Accepted,
    /// This fragment completed the packet.
    Completed(Vec<u8>),
    /// Malformed or out of protocol; dropped.
    Rejected,
}

struct FragmentSlot {
    data: Vec<u8>,
    received: bool,
}

struct PendingReassembly {
    total: u16,
    received_count: u16,
    fragments: Vec<FragmentSlot>,
    started_at: Instant,
    last_activity: Instant,
}

impl PendingReassembly {
    fn new(total: u16, now: Instant) -> Self {
        Self {
            total,
            received_count: 0,
            fragments: (0..total).map(|_| FragmentSlot { data: Vec::new(), received: false }).collect(),
            started_at: now,
            last_activity: now,
        }
    }
}

/// Rebuilds packets from link fragments, keyed by the peer's 16-byte
/// identity rather than its rotating MAC. The session entry is erased
/// before the completion callback runs.
pub struct Reassembler {
    pending: HashMap<AddressHash, PendingReassembly>,
    timeout: Duration,
    reassembly_callback: Option<ReassemblyCallback>,
    timeout_callback: Option<TimeoutCallback>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            timeout: REASSEMBLY_TIMEOUT,
            reassembly_callback: None,
            timeout_callback: None,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_reassembly_callback(&mut self, callback: ReassemblyCallback) {
        self.reassembly_callback = Some(callback);
    }

    pub fn set_timeout_callback(&mut self, callback: TimeoutCallback) {
        self.timeout_callback = Some(callback);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self, peer: &AddressHash) -> bool {
        self.pending.contains_key(peer)
    }

    pub fn clear_for_peer(&mut self, peer: &AddressHash) {
        if self.pending.remove(peer).is_some() {
            log::debug!("reassembler: cleared session for {}", peer);
        }
    }

    pub fn clear_all(&mut self) {
        log::debug!("reassembler: clearing {} sessions", self.pending.len());
        self.pending.clear();
    }

    /// Feeds one received fragment for `peer`.
    pub fn process_fragment(
        &mut self,
        peer: AddressHash,
        fragment: &[u8],
        now: Instant,
    ) -> FragmentOutcome {
        let (header, payload) = match parse(fragment) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::debug!("reassembler: bad fragment from {}: {}", peer, err);
                return FragmentOutcome::Rejected;
            }
        };

        if header.total == 0 {
            log::debug!("reassembler: zero-total fragment from {}", peer);
            return FragmentOutcome::Rejected;
        }

        if header.fragment_type == FragmentType::Start {
            // A START belonging to a different packet restarts the session;
            // one that fills the still-missing slot 0 of the current packet
            // is an ordinary (late) fragment.
            let restart = match self.pending.get(&peer) {
                Some(session) => {
                    session.total != header.total
                        || session.fragments.first().is_some_and(|slot| slot.received)
                }
                None => true,
            };
            if restart {
                if self.pending.remove(&peer).is_some() {
                    log::debug!("reassembler: new START discards incomplete session for {}", peer);
                }
                self.pending.insert(peer, PendingReassembly::new(header.total, now));
            }
        } else if !self.pending.contains_key(&peer) {
            // Fragments may arrive in any order; the first one opens the
            // session with the total its header claims.
            self.pending.insert(peer, PendingReassembly::new(header.total, now));
        }

        let Some(session) = self.pending.get_mut(&peer) else {
            return FragmentOutcome::Rejected;
        };

        if header.total != session.total {
            log::debug!(
                "reassembler: total mismatch from {} (expected {}, got {})",
                peer,
                session.total,
                header.total
            );
            return FragmentOutcome::Rejected;
        }

        if header.sequence >= session.total {
            log::debug!("reassembler: sequence {} out of range from {}", header.sequence, peer);
            return FragmentOutcome::Rejected;
        }

        let slot = &mut session.fragments[header.sequence as usize];
        if slot.received {
            log::trace!("reassembler: duplicate fragment {} from {}", header.sequence, peer);
            session.last_activity = now;
            return FragmentOutcome::Accepted;
        }

        slot.data = payload.to_vec();
        slot.received = true;
        session.received_count += 1;
        session.last_activity = now;

        log::trace!(
            "reassembler: fragment {}/{} from {}",
            header.sequence + 1,
            session.total,
            peer
        );

        if session.received_count == session.total {
            // Erase before the callback; it may push new fragments at us
            if let Some(session) = self.pending.remove(&peer) {
                let assembled = assemble(&session);
                log::debug!("reassembler: completed {} bytes from {}", assembled.len(), peer);

                if let Some(callback) = self.reassembly_callback.as_mut() {
                    callback(peer, assembled.clone());
                }
                return FragmentOutcome::Completed(assembled);
            }
        }

        FragmentOutcome::Accepted
    }

    /// Drops sessions older than the reassembly timeout, counted from the
    /// session start.
    pub fn check_timeouts(&mut self, now: Instant) {
        let timeout = self.timeout;
        let expired: Vec<AddressHash> = self
            .pending
            .iter()
            .filter(|(_, session)| now.duration_since(session.started_at) > timeout)
            .map(|(peer, _)| *peer)
            .collect();

        for peer in expired {
            if let Some(session) = self.pending.remove(&peer) {
                log::warn!(
                    "reassembler: timeout for {}, received {}/{}",
                    peer,
                    session.received_count,
                    session.total
                );
                if let Some(callback) = self.timeout_callback.as_mut() {
                    callback(peer, "reassembly timeout");
                }
            }
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

fn assemble(session: &PendingReassembly) -> Vec<u8> {
    let total_size: usize = session.fragments.iter().map(|slot| slot.data.len()).sum();
    let mut packet = Vec::with_capacity(total_size);
    for slot in &session.fragments {
        packet.extend_from_slice(&slot.data);
    }
    packet
}

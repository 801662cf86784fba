use std::collections::HashMap;
use std::time::{Duration, Instant};

use weft_core::hash::{AddressHash, Hash};
use weft_core::packet::{HeaderKind, Packet, Propagation, MAX_HOPS};

pub struct PathEntry {
    pub next_hop: AddressHash,
    pub iface: AddressHash,
    pub hops: u8,
    pub timestamp: Instant,
    pub expires_at: Instant,
    pub announce_hash: Hash,
}

impl PathEntry {
    fn expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// One route per destination. Replacement accepts strictly fewer hops,
/// equal hops observed later, or anything over an expired entry; a live
/// path never silently degrades to more hops.
pub struct PathTable {
    map: HashMap<AddressHash, PathEntry>,
    expiry: Duration,
}

impl PathTable {
    pub fn new(expiry: Duration) -> Self {
        Self { map: HashMap::new(), expiry }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, destination: &AddressHash) -> Option<&PathEntry> {
        self.map.get(destination)
    }

    pub fn next_hop_iface(&self, destination: &AddressHash) -> Option<AddressHash> {
        self.map.get(destination).map(|entry| entry.iface)
    }

    pub fn hops_to(&self, destination: &AddressHash) -> Option<u8> {
        self.map.get(destination).map(|entry| entry.hops)
    }

    /// Applies the replacement policy for a validated announce observed at
    /// `now`. `hops` is the announce hop count after the local increment.
    /// Returns true when the table changed.
    pub fn insert(
        &mut self,
        destination: AddressHash,
        next_hop: AddressHash,
        iface: AddressHash,
        hops: u8,
        announce_hash: Hash,
        now: Instant,
    ) -> bool {
        if let Some(existing) = self.map.get(&destination) {
            let replace = hops < existing.hops
                || (hops == existing.hops && now > existing.timestamp)
                || existing.expired(now);
            if !replace {
                return false;
            }
        }

        self.map.insert(
            destination,
            PathEntry {
                next_hop,
                iface,
                hops,
                timestamp: now,
                expires_at: now + self.expiry,
                announce_hash,
            },
        );

        log::info!(
            "path: {} reachable over {} hops via {} on {}",
            destination,
            hops,
            next_hop,
            iface,
        );

        true
    }

    /// Prepares a transit packet for its next hop: bumps the hop count and
    /// promotes multi-hop routes to transport framing. `None` when there is
    /// no usable route.
    pub fn forward(&self, packet: &Packet, now: Instant) -> Option<(Packet, AddressHash)> {
        if packet.header.hops >= MAX_HOPS {
            return None;
        }

        let entry = self.map.get(&packet.destination)?;
        if entry.expired(now) {
            return None;
        }

        let mut forwarded = packet.clone();
        forwarded.header.hops += 1;

        if entry.hops > 1 {
            forwarded.header.kind = HeaderKind::Transport;
            forwarded.header.propagation = Propagation::Transport;
            forwarded.transport_id = Some(entry.next_hop);
        }

        Some((forwarded, entry.iface))
    }

    /// Removes expired entries.
    pub fn sweep(&mut self, now: Instant) {
        self.map.retain(|destination, entry| {
            let keep = !entry.expired(now);
            if !keep {
                log::debug!("path: expired route to {}", destination);
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::hash::{full_hash, truncated_hash};

    const EXPIRY: Duration = Duration::from_secs(60);

    fn table() -> PathTable {
        PathTable::new(EXPIRY)
    }

    fn addr(tag: &[u8]) -> AddressHash {
        truncated_hash(tag)
    }

    #[test]
    fn fewer_hops_replaces() {
        let mut table = table();
        let destination = addr(b"dest");
        let now = Instant::now();

        assert!(table.insert(destination, addr(b"a"), addr(b"if1"), 3, full_hash(b"x"), now));
        assert!(!table.insert(
            destination,
            addr(b"b"),
            addr(b"if2"),
            5,
            full_hash(b"y"),
            now + Duration::from_secs(1)
        ));
        assert_eq!(table.hops_to(&destination), Some(3));

        assert!(table.insert(
            destination,
            addr(b"c"),
            addr(b"if3"),
            2,
            full_hash(b"z"),
            now + Duration::from_secs(2)
        ));
        assert_eq!(table.hops_to(&destination), Some(2));
    }

    #[test]
    fn equal_hops_fresher_timestamp_replaces() {
        let mut table = table();
        let destination = addr(b"dest");
        let now = Instant::now();

        table.insert(destination, addr(b"a"), addr(b"if1"), 2, full_hash(b"x"), now);
        let replaced = table.insert(
            destination,
            addr(b"b"),
            addr(b"if2"),
            2,
            full_hash(b"y"),
            now + Duration::from_secs(1),
        );

        assert!(replaced);
        assert_eq!(table.get(&destination).map(|entry| entry.next_hop), Some(addr(b"b")));
    }

    #[test]
    fn expired_entry_accepts_anything() {
        let mut table = table();
        let destination = addr(b"dest");
        let now = Instant::now();

        table.insert(destination, addr(b"a"), addr(b"if1"), 1, full_hash(b"x"), now);

        let after_expiry = now + EXPIRY + Duration::from_secs(1);
        assert!(table.insert(
            destination,
            addr(b"b"),
            addr(b"if2"),
            7,
            full_hash(b"y"),
            after_expiry
        ));
        assert_eq!(table.hops_to(&destination), Some(7));
    }

    #[test]
    fn forward_single_hop_keeps_plain_header() {
        let mut table = table();
        let destination = addr(b"dest");
        let iface = addr(b"if1");
        let now = Instant::now();
        table.insert(destination, destination, iface, 1, full_hash(b"x"), now);

        let packet = Packet { destination, ..Default::default() };
        let (forwarded, via) = table.forward(&packet, now).expect("route");

        assert_eq!(via, iface);
        assert_eq!(forwarded.header.hops, 1);
        assert_eq!(forwarded.header.kind, HeaderKind::Plain);
        assert_eq!(forwarded.transport_id, None);
    }

    #[test]
    fn forward_multihop_promotes_to_transport() {
        let mut table = table();
        let destination = addr(b"dest");
        let next_hop = addr(b"relay");
        let iface = addr(b"if1");
        let now = Instant::now();
        table.insert(destination, next_hop, iface, 3, full_hash(b"x"), now);

        let packet = Packet { destination, ..Default::default() };
        let (forwarded, _) = table.forward(&packet, now).expect("route");

        assert_eq!(forwarded.header.kind, HeaderKind::Transport);
        assert_eq!(forwarded.header.propagation, Propagation::Transport);
        assert_eq!(forwarded.transport_id, Some(next_hop));
    }

    #[test]
    fn forward_refuses_exhausted_hop_budget() {
        let mut table = table();
        let destination = addr(b"dest");
        let now = Instant::now();
        table.insert(destination, destination, addr(b"if1"), 1, full_hash(b"x"), now);

        let mut packet = Packet { destination, ..Default::default() };
        packet.header.hops = MAX_HOPS;
        assert!(table.forward(&packet, now).is_none());
    }

    #[test]
    fn sweep_drops_expired_routes() {
        let mut table = table();
        let destination = addr(b"dest");
        let now = Instant::now();
        table.insert(destination, destination, addr(b"if1"), 1, full_hash(b"x"), now);

        table.sweep(now + EXPIRY + Duration::from_secs(1));
        assert!(table.is_empty());
    }
}

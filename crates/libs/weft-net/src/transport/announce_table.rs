use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use weft_core::hash::AddressHash;
use weft_core::packet::{HeaderKind, Packet, Propagation, MAX_HOPS};

#[derive(Clone)]
pub struct AnnounceEntry {
    pub packet: Packet,
    pub hops: u8,
    pub iface: AddressHash,
    pub received_at: Instant,
}

/// Bounded cache of the latest validated announce per destination, used to
/// rebuild rebroadcast packets and to serve cached copies to late
/// subscribers. Insertion order bounds eviction.
pub struct AnnounceTable {
    capacity: usize,
    map: HashMap<AddressHash, AnnounceEntry>,
    order: VecDeque<AddressHash>,
}

impl AnnounceTable {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, map: HashMap::new(), order: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, destination: &AddressHash) -> Option<&AnnounceEntry> {
        self.map.get(destination)
    }

    pub fn insert(&mut self, destination: AddressHash, entry: AnnounceEntry) {
        if self.map.insert(destination, entry).is_none() {
            self.order.push_back(destination);

            if self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.map.remove(&oldest);
                }
            }
        }
    }

    /// Builds the outgoing rebroadcast copy of a cached announce. With a
    /// transport id the copy is promoted to transport framing so downstream
    /// nodes learn the retransmitter as their next hop. `None` once the hop
    /// budget is exhausted.
    pub fn rebroadcast_packet(
        &self,
        destination: &AddressHash,
        transport_id: Option<AddressHash>,
    ) -> Option<Packet> {
        let entry = self.map.get(destination)?;

        if entry.hops >= MAX_HOPS {
            return None;
        }

        let mut packet = entry.packet.clone();
        packet.header.hops = entry.hops;

        if let Some(transport_id) = transport_id {
            packet.header.kind = HeaderKind::Transport;
            packet.header.propagation = Propagation::Transport;
            packet.transport_id = Some(transport_id);
        }

        Some(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::hash::truncated_hash;

    fn entry(iface: &[u8], hops: u8) -> AnnounceEntry {
        AnnounceEntry {
            packet: Packet::default(),
            hops,
            iface: truncated_hash(iface),
            received_at: Instant::now(),
        }
    }

    #[test]
    fn capacity_evicts_oldest_destination() {
        let mut table = AnnounceTable::new(2);
        let first = truncated_hash(b"one");
        let second = truncated_hash(b"two");
        let third = truncated_hash(b"three");

        table.insert(first, entry(b"if", 1));
        table.insert(second, entry(b"if", 1));
        table.insert(third, entry(b"if", 1));

        assert_eq!(table.len(), 2);
        assert!(table.get(&first).is_none());
        assert!(table.get(&third).is_some());
    }

    #[test]
    fn rebroadcast_with_transport_id_promotes_header() {
        let mut table = AnnounceTable::new(4);
        let destination = truncated_hash(b"dest");
        let relay = truncated_hash(b"self");

        table.insert(destination, entry(b"if", 2));

        let packet = table.rebroadcast_packet(&destination, Some(relay)).expect("cached");
        assert_eq!(packet.header.hops, 2);
        assert_eq!(packet.header.kind, HeaderKind::Transport);
        assert_eq!(packet.transport_id, Some(relay));
    }

    #[test]
    fn rebroadcast_stops_at_hop_ceiling() {
        let mut table = AnnounceTable::new(4);
        let destination = truncated_hash(b"dest");

        table.insert(destination, entry(b"if", MAX_HOPS));
        assert!(table.rebroadcast_packet(&destination, None).is_none());
    }
}

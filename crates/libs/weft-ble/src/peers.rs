use std::collections::HashMap;
use std::time::{Duration, Instant};

use weft_core::hash::AddressHash;

use crate::identity::MacAddress;

const SCORE_CEILING: i32 = 100;
const SCORE_TRAFFIC_BUMP: i32 = 1;
const SCORE_SEND_FAILURE_PENALTY: i32 = 5;

#[derive(Debug, Clone)]
pub struct BlePeer {
    pub mac: MacAddress,
    pub identity: Option<AddressHash>,
    pub connected: bool,
    /// True when we initiated this connection.
    pub is_central: bool,
    pub last_heard: Instant,
    pub score: i32,
}

/// Connection-state and quality bookkeeping for BLE peers. Scores rise
/// with traffic and fall with send failures; disconnected peers are
/// evicted once stale.
pub struct BlePeerTable {
    peers: HashMap<MacAddress, BlePeer>,
    stale_timeout: Duration,
}

impl BlePeerTable {
    pub fn new(stale_timeout: Duration) -> Self {
        Self { peers: HashMap::new(), stale_timeout }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, mac: &MacAddress) -> Option<&BlePeer> {
        self.peers.get(mac)
    }

    pub fn connected(&mut self, mac: MacAddress, is_central: bool, now: Instant) {
        let peer = self.peers.entry(mac).or_insert(BlePeer {
            mac,
            identity: None,
            connected: true,
            is_central,
            last_heard: now,
            score: 0,
        });
        peer.connected = true;
        peer.is_central = is_central;
        peer.last_heard = now;
        log::debug!("ble peers: {} connected ({})", mac, if is_central { "central" } else { "peripheral" });
    }

    pub fn is_central(&self, mac: &MacAddress) -> bool {
        self.peers.get(mac).map(|peer| peer.is_central).unwrap_or(false)
    }

    pub fn disconnected(&mut self, mac: &MacAddress) {
        if let Some(peer) = self.peers.get_mut(mac) {
            peer.connected = false;
            log::debug!("ble peers: {} disconnected", mac);
        }
    }

    pub fn set_identity(&mut self, mac: &MacAddress, identity: AddressHash) {
        if let Some(peer) = self.peers.get_mut(mac) {
            peer.identity = Some(identity);
        }
    }

    /// Traffic from a peer refreshes its clock and nudges its score up.
    pub fn heard(&mut self, mac: &MacAddress, now: Instant) {
        if let Some(peer) = self.peers.get_mut(mac) {
            peer.last_heard = now;
            peer.score = (peer.score + SCORE_TRAFFIC_BUMP).min(SCORE_CEILING);
        }
    }

    pub fn send_failed(&mut self, mac: &MacAddress) {
        if let Some(peer) = self.peers.get_mut(mac) {
            peer.score = (peer.score - SCORE_SEND_FAILURE_PENALTY).max(0);
            log::debug!("ble peers: send to {} failed, score {}", mac, peer.score);
        }
    }

    /// MACs of connected peers with a completed identity handshake, the
    /// fan-out set for outgoing packets.
    pub fn sendable(&self) -> Vec<MacAddress> {
        self.peers
            .values()
            .filter(|peer| peer.connected && peer.identity.is_some())
            .map(|peer| peer.mac)
            .collect()
    }

    /// Evicts disconnected peers that have gone quiet. Connected peers
    /// stay regardless; the link supervisor owns their fate.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<MacAddress> {
        let timeout = self.stale_timeout;
        let stale: Vec<MacAddress> = self
            .peers
            .values()
            .filter(|peer| !peer.connected && now.duration_since(peer.last_heard) > timeout)
            .map(|peer| peer.mac)
            .collect();

        for mac in &stale {
            self.peers.remove(mac);
            log::info!("ble peers: evicted stale peer {}", mac);
        }

        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::hash::truncated_hash;

    fn mac(value: u8) -> MacAddress {
        MacAddress([value; 6])
    }

    #[test]
    fn sendable_requires_connection_and_identity() {
        let mut table = BlePeerTable::new(Duration::from_secs(60));
        let now = Instant::now();

        table.connected(mac(1), false, now);
        table.connected(mac(2), false, now);
        table.set_identity(&mac(2), truncated_hash(b"peer"));
        table.connected(mac(3), true, now);
        table.set_identity(&mac(3), truncated_hash(b"other"));
        table.disconnected(&mac(3));

        assert_eq!(table.sendable(), vec![mac(2)]);
    }

    #[test]
    fn score_rises_with_traffic_and_falls_with_failures() {
        let mut table = BlePeerTable::new(Duration::from_secs(60));
        let now = Instant::now();
        table.connected(mac(1), false, now);

        for _ in 0..3 {
            table.heard(&mac(1), now);
        }
        assert_eq!(table.get(&mac(1)).expect("peer").score, 3);

        table.send_failed(&mac(1));
        assert_eq!(table.get(&mac(1)).expect("peer").score, 0);
    }

    #[test]
    fn stale_eviction_spares_connected_peers() {
        let mut table = BlePeerTable::new(Duration::from_secs(60));
        let start = Instant::now();

        table.connected(mac(1), false, start);
        table.connected(mac(2), false, start);
        table.disconnected(&mac(2));

        let evicted = table.evict_stale(start + Duration::from_secs(61));
        assert_eq!(evicted, vec![mac(2)]);
        assert!(table.get(&mac(1)).is_some());
        assert!(table.get(&mac(2)).is_none());
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use weft_core::bytes::Bytes;
use weft_core::destination::{AnnounceInfo, InDestination};
use weft_core::hash::{full_hash, AddressHash};
use weft_core::identity::Identity;
use weft_core::packet::{HeaderKind, Packet, PacketHeader, PacketType, Propagation};

use crate::iface::{DedupDeque, InterfaceManager, TxMessage, TxTarget};

use super::announce_limits::AnnounceLimits;
use super::announce_table::{AnnounceEntry, AnnounceTable};
use super::path_table::PathTable;
use super::retransmit::RetransmitQueue;
use super::{AnnounceEvent, DeliveryEvent, RetransmitDrop, TransportConfig, TransportStats};

pub(super) struct TransportHandler {
    pub(super) config: TransportConfig,
    pub(super) identity: weft_core::identity::PrivateIdentity,
    pub(super) iface_manager: InterfaceManager,
    pub(super) dedup: DedupDeque,
    pub(super) path_table: PathTable,
    pub(super) announce_table: AnnounceTable,
    pub(super) announce_limits: AnnounceLimits,
    pub(super) retransmit: RetransmitQueue,
    pub(super) destinations: HashMap<AddressHash, Arc<InDestination>>,
    pub(super) remote_identities: HashMap<AddressHash, Identity>,
    pub(super) announce_tx: broadcast::Sender<AnnounceEvent>,
    pub(super) delivery_tx: broadcast::Sender<DeliveryEvent>,
    pub(super) drop_tx: broadcast::Sender<RetransmitDrop>,
    pub(super) probe_destination: Option<AddressHash>,
    pub(super) stats: TransportStats,
}

impl TransportHandler {
    /// Single ingress point: fingerprint dedup, decode, dispatch.
    pub(super) fn handle_inbound(&mut self, iface: AddressHash, raw: &[u8], now: Instant) {
        let fingerprint = full_hash(raw);
        if !self.dedup.observe(fingerprint, now) {
            self.stats.duplicates_dropped += 1;
            log::debug!("tp({}): dropping duplicate packet on {}", self.config.name, iface);
            return;
        }

        let packet = match Packet::decode(raw) {
            Ok(packet) => packet,
            Err(err) => {
                self.stats.malformed_frames += 1;
                log::debug!("tp({}): undecodable frame on {}: {:?}", self.config.name, iface, err);
                return;
            }
        };

        log::trace!("tp({}): rx({}) {}", self.config.name, iface, packet);

        match packet.header.packet_type {
            PacketType::Announce => self.handle_announce(iface, &packet, now),
            PacketType::Data | PacketType::Proof => self.handle_data(iface, &packet, now),
            PacketType::LinkRequest => {
                log::trace!("tp({}): ignoring link request", self.config.name);
            }
        }
    }

    fn handle_announce(&mut self, iface: AddressHash, packet: &Packet, now: Instant) {
        if self.destinations.contains_key(&packet.destination) {
            // Our own announce came back around
            return;
        }

        if let Some(blocked_for) = self.announce_limits.check(&packet.destination, now) {
            log::info!(
                "tp({}): too many announces from {}, blocked for {}s",
                self.config.name,
                packet.destination,
                blocked_for.as_secs(),
            );
            return;
        }

        let info = match AnnounceInfo::validate(packet) {
            Ok(info) => info,
            Err(err) => {
                self.stats.invalid_announces += 1;
                log::debug!(
                    "tp({}): invalid announce for {}: {:?}",
                    self.config.name,
                    packet.destination,
                    err
                );
                return;
            }
        };

        let hops = packet.header.hops.saturating_add(1);
        let next_hop = packet.transport_id.unwrap_or(packet.destination);

        self.remote_identities.insert(*info.identity.address_hash(), info.identity);

        let updated = self.path_table.insert(
            packet.destination,
            next_hop,
            iface,
            hops,
            packet.packet_hash(),
            now,
        );

        if updated {
            // The cache mirrors the routes the path table accepted
            self.announce_table.insert(
                packet.destination,
                AnnounceEntry { packet: packet.clone(), hops, iface, received_at: now },
            );
        }

        // Insert precedes dispatch so a re-entrant subscriber sees the path
        let _ = self.announce_tx.send(AnnounceEvent {
            destination: packet.destination,
            identity_address: *info.identity.address_hash(),
            app_data: info.app_data,
            hops,
            iface,
            packet: packet.clone(),
        });

        if updated {
            let transport_id = self.config.transport_enabled.then(|| *self.identity.address_hash());
            if let Some(rebroadcast) =
                self.announce_table.rebroadcast_packet(&packet.destination, transport_id)
            {
                self.send_encoded(&rebroadcast, TxTarget::Broadcast(Some(iface)), now);
            }
        }
    }

    fn handle_data(&mut self, iface: AddressHash, packet: &Packet, now: Instant) {
        if self.destinations.contains_key(&packet.destination) {
            let _ = self.delivery_tx.send(DeliveryEvent {
                destination: packet.destination,
                packet: packet.clone(),
            });

            if self.probe_destination == Some(packet.destination)
                && packet.header.packet_type == PacketType::Data
            {
                let proof = self.build_probe_proof(packet);
                self.send_encoded(&proof, TxTarget::Direct(iface), now);
            }
            return;
        }

        // Transit traffic bound through another transport node is not ours
        if packet.header.kind == HeaderKind::Transport
            && packet.transport_id != Some(*self.identity.address_hash())
        {
            return;
        }

        if !self.config.transport_enabled {
            log::trace!("tp({}): not forwarding, transport disabled", self.config.name);
            return;
        }

        match self.path_table.forward(packet, now) {
            Some((forwarded, out_iface)) => {
                self.stats.forwarded_packets += 1;
                self.send_encoded(&forwarded, TxTarget::Direct(out_iface), now);
            }
            None => {
                log::trace!("tp({}): no path for {}, dropped", self.config.name, packet.destination);
            }
        }
    }

    /// Proof-of-receipt for the probe destination: the probed packet's hash
    /// plus a signature over it, addressed by that hash.
    fn build_probe_proof(&self, probe: &Packet) -> Packet {
        let probe_hash = probe.packet_hash();
        let signature = self.identity.sign(probe_hash.as_slice());

        let mut data =
            Vec::with_capacity(probe_hash.as_slice().len() + signature.to_bytes().len());
        data.extend_from_slice(probe_hash.as_slice());
        data.extend_from_slice(&signature.to_bytes());

        Packet {
            header: PacketHeader { packet_type: PacketType::Proof, ..Default::default() },
            destination: AddressHash::from_hash(&probe_hash),
            data: Bytes::from_vec(data),
            ..Default::default()
        }
    }

    /// Routes a locally-originated packet: direct over a known path,
    /// promoted to transport framing for multi-hop routes, broadcast when
    /// no path is known.
    pub(super) fn send_outbound(&mut self, packet: &Packet, now: Instant) {
        if packet.header.packet_type == PacketType::Announce {
            self.send_encoded(packet, TxTarget::Broadcast(None), now);
            return;
        }

        let route = self
            .path_table
            .get(&packet.destination)
            .map(|entry| (entry.hops, entry.next_hop, entry.iface));

        match route {
            Some((hops, next_hop, iface)) => {
                let mut routed = packet.clone();
                if hops > 1 {
                    routed.header.kind = HeaderKind::Transport;
                    routed.header.propagation = Propagation::Transport;
                    routed.transport_id = Some(next_hop);
                }
                self.send_encoded(&routed, TxTarget::Direct(iface), now);
            }
            None => {
                self.send_encoded(packet, TxTarget::Broadcast(None), now);
            }
        }
    }

    fn send_encoded(&mut self, packet: &Packet, target: TxTarget, now: Instant) {
        match packet.encode() {
            Ok(raw) => self.send_raw(target, raw, now),
            Err(err) => {
                log::warn!("tp({}): unencodable packet: {:?}", self.config.name, err);
            }
        }
    }

    fn send_raw(&mut self, target: TxTarget, raw: Vec<u8>, now: Instant) {
        let report = self.iface_manager.dispatch(&TxMessage { target, raw: raw.clone() });
        for iface in report.failed {
            self.retransmit.enqueue(iface, raw.clone(), now);
        }
    }

    /// Applies every deadline: dedup TTL, path expiry, retransmit backoff.
    pub(super) fn sweep(&mut self, now: Instant) {
        self.dedup.sweep(now);
        self.path_table.sweep(now);
        self.iface_manager.cleanup();

        for entry in self.retransmit.due(now) {
            let report = self.iface_manager.dispatch(&TxMessage {
                target: TxTarget::Direct(entry.iface),
                raw: entry.raw.clone(),
            });

            if !report.failed.is_empty() {
                if let Some(dropped) = self.retransmit.requeue(entry, now) {
                    let _ = self.drop_tx.send(RetransmitDrop {
                        iface: dropped.iface,
                        raw: dropped.raw,
                        attempts: dropped.attempts,
                    });
                }
            }
        }
    }

    pub(super) fn identity_for(&self, address: &AddressHash) -> Option<&Identity> {
        self.remote_identities.get(address)
    }
}

#[cfg(test)]
mod tests {
    // MAX_HOPS is pinned by the wire format; the forwarding tests in
    // path_table and the integration suite rely on it.
    #[test]
    fn hop_ceiling_is_stable() {
        assert_eq!(weft_core::packet::MAX_HOPS, 128);
    }
}

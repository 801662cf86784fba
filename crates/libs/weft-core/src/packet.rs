use core::fmt;

use sha2::Digest;

use crate::bytes::Bytes;
use crate::error::WeftError;
use crate::hash::{AddressHash, Hash, ADDRESS_SIZE};

/// Ceiling on forwarding depth; packets at or past this hop count are
/// never reforwarded.
pub const MAX_HOPS: u8 = 128;

/// Payload ceiling for a 500-byte MTU after the largest header form:
/// 500 - (flags + hops + 2 * address + context).
pub const PACKET_MDU: usize = 464;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum IfacFlag {
    Open = 0b0,
    Authenticated = 0b1,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum HeaderKind {
    /// Destination only.
    Plain = 0b0,
    /// Transport id precedes the destination.
    Transport = 0b1,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Propagation {
    Broadcast = 0b0,
    Transport = 0b1,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum DestinationKind {
    Single = 0b00,
    Group = 0b01,
    Plain = 0b10,
    Link = 0b11,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum PacketType {
    Data = 0b00,
    Announce = 0b01,
    LinkRequest = 0b10,
    Proof = 0b11,
}

/// Raw context byte. Only the values this runtime dispatches on get named
/// constants; everything else passes through untouched.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, Default)]
pub struct PacketContext(pub u8);

impl PacketContext {
    pub const NONE: Self = Self(0x00);
    pub const RESOURCE: Self = Self(0x01);
    pub const RESOURCE_ADVERTISEMENT: Self = Self(0x02);
    pub const RESOURCE_REQUEST: Self = Self(0x03);
    pub const RESOURCE_PROOF: Self = Self(0x05);
    pub const PATH_RESPONSE: Self = Self(0x0B);
    pub const KEEP_ALIVE: Self = Self(0xFA);
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct PacketHeader {
    pub ifac_flag: IfacFlag,
    pub kind: HeaderKind,
    pub context_flag: bool,
    pub propagation: Propagation,
    pub destination_kind: DestinationKind,
    pub packet_type: PacketType,
    pub hops: u8,
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            ifac_flag: IfacFlag::Open,
            kind: HeaderKind::Plain,
            context_flag: false,
            propagation: Propagation::Broadcast,
            destination_kind: DestinationKind::Single,
            packet_type: PacketType::Data,
            hops: 0,
        }
    }
}

impl PacketHeader {
    pub fn flags(&self) -> u8 {
        (self.ifac_flag as u8) << 7
            | (self.kind as u8) << 6
            | (self.context_flag as u8) << 5
            | (self.propagation as u8) << 4
            | (self.destination_kind as u8) << 2
            | self.packet_type as u8
    }

    pub fn from_flags(flags: u8) -> Self {
        Self {
            ifac_flag: if flags >> 7 & 0b1 == 0 { IfacFlag::Open } else { IfacFlag::Authenticated },
            kind: if flags >> 6 & 0b1 == 0 { HeaderKind::Plain } else { HeaderKind::Transport },
            context_flag: flags >> 5 & 0b1 == 1,
            propagation: if flags >> 4 & 0b1 == 0 {
                Propagation::Broadcast
            } else {
                Propagation::Transport
            },
            destination_kind: match flags >> 2 & 0b11 {
                0b00 => DestinationKind::Single,
                0b01 => DestinationKind::Group,
                0b10 => DestinationKind::Plain,
                _ => DestinationKind::Link,
            },
            packet_type: match flags & 0b11 {
                0b00 => PacketType::Data,
                0b01 => PacketType::Announce,
                0b10 => PacketType::LinkRequest,
                _ => PacketType::Proof,
            },
            hops: 0,
        }
    }
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08b}.{}", self.flags(), self.hops)
    }
}

/// One framed transport unit.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet {
    pub header: PacketHeader,
    pub transport_id: Option<AddressHash>,
    pub destination: AddressHash,
    pub context: PacketContext,
    pub data: Bytes,
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            header: PacketHeader::default(),
            transport_id: None,
            destination: AddressHash::zero(),
            context: PacketContext::NONE,
            data: Bytes::new(),
        }
    }
}

impl Packet {
    pub fn decode(bytes: &[u8]) -> Result<Self, WeftError> {
        let min_len = 2 + ADDRESS_SIZE + 1;
        if bytes.len() < min_len {
            return Err(WeftError::PacketError);
        }

        let mut header = PacketHeader::from_flags(bytes[0]);
        header.hops = bytes[1];

        let mut offset = 2;

        let transport_id = if header.kind == HeaderKind::Transport {
            if bytes.len() < min_len + ADDRESS_SIZE {
                return Err(WeftError::PacketError);
            }
            let id = AddressHash::from_slice(&bytes[offset..offset + ADDRESS_SIZE])?;
            offset += ADDRESS_SIZE;
            Some(id)
        } else {
            None
        };

        let destination = AddressHash::from_slice(&bytes[offset..offset + ADDRESS_SIZE])?;
        offset += ADDRESS_SIZE;

        let context = PacketContext(bytes[offset]);
        offset += 1;

        Ok(Self { header, transport_id, destination, context, data: Bytes::from_slice(&bytes[offset..]) })
    }

    pub fn encode(&self) -> Result<Vec<u8>, WeftError> {
        let mut out = Vec::with_capacity(2 + 2 * ADDRESS_SIZE + 1 + self.data.len());

        out.push(self.header.flags());
        out.push(self.header.hops);

        if self.header.kind == HeaderKind::Transport {
            let transport_id = self.transport_id.ok_or(WeftError::PacketError)?;
            out.extend_from_slice(transport_id.as_slice());
        }

        out.extend_from_slice(self.destination.as_slice());
        out.push(self.context.0);
        out.extend_from_slice(self.data.as_slice());

        Ok(out)
    }

    /// Content hash used for deduplication and proofs. Covers only the
    /// hop-invariant flag bits, so the hash survives transport.
    pub fn packet_hash(&self) -> Hash {
        Hash::from_digest(
            Hash::hasher()
                .chain_update([self.header.flags() & 0b0000_1111])
                .chain_update(self.destination.as_slice())
                .chain_update([self.context.0])
                .chain_update(self.data.as_slice()),
        )
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.header)?;
        if let Some(transport_id) = self.transport_id {
            write!(f, " via {}", transport_id)?;
        }
        write!(f, " {} {}B]", self.destination, self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::truncated_hash;

    #[test]
    fn flags_roundtrip() {
        let header = PacketHeader {
            ifac_flag: IfacFlag::Open,
            kind: HeaderKind::Transport,
            context_flag: true,
            propagation: Propagation::Transport,
            destination_kind: DestinationKind::Single,
            packet_type: PacketType::Announce,
            hops: 0,
        };

        let decoded = PacketHeader::from_flags(header.flags());
        assert_eq!(decoded.kind, HeaderKind::Transport);
        assert_eq!(decoded.propagation, Propagation::Transport);
        assert_eq!(decoded.packet_type, PacketType::Announce);
        assert!(decoded.context_flag);
    }

    #[test]
    fn wire_roundtrip_plain_header() {
        let packet = Packet {
            destination: truncated_hash(b"destination"),
            context: PacketContext::RESOURCE,
            data: Bytes::from_slice(b"payload"),
            ..Default::default()
        };

        let encoded = packet.encode().expect("encodable");
        let decoded = Packet::decode(&encoded).expect("decodable");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn wire_roundtrip_transport_header() {
        let packet = Packet {
            header: PacketHeader { kind: HeaderKind::Transport, hops: 3, ..Default::default() },
            transport_id: Some(truncated_hash(b"relay")),
            destination: truncated_hash(b"destination"),
            context: PacketContext::NONE,
            data: Bytes::from_slice(&[0u8; 64]),
        };

        let encoded = packet.encode().expect("encodable");
        let decoded = Packet::decode(&encoded).expect("decodable");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn packet_hash_ignores_hops() {
        let mut packet = Packet {
            destination: truncated_hash(b"destination"),
            data: Bytes::from_slice(b"payload"),
            ..Default::default()
        };
        let before = packet.packet_hash();

        packet.header.hops = 7;
        assert_eq!(packet.packet_hash(), before);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        assert!(Packet::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn encode_transport_header_requires_transport_id() {
        let packet = Packet {
            header: PacketHeader { kind: HeaderKind::Transport, ..Default::default() },
            ..Default::default()
        };
        assert!(packet.encode().is_err());
    }
}

use core::fmt;

use ed25519_dalek::Signature;
use sha2::Digest;

use crate::bytes::Bytes;
use crate::error::WeftError;
use crate::hash::{AddressHash, Hash};
use crate::identity::{
    Identity, PrivateIdentity, PUBLIC_MATERIAL_SIZE, SIGNATURE_SIZE,
};
use crate::packet::{Packet, PacketHeader, PacketType};

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Kind {
    Single,
    Group,
    Plain,
    Link,
}

/// Two-part destination name, rendered as `app.aspect`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DestinationName {
    pub app: String,
    pub aspect: String,
}

impl DestinationName {
    pub fn new(app: &str, aspect: &str) -> Self {
        Self { app: app.into(), aspect: aspect.into() }
    }

    pub fn name_bytes(&self) -> Vec<u8> {
        format!("{}.{}", self.app, self.aspect).into_bytes()
    }
}

impl fmt::Display for DestinationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app, self.aspect)
    }
}

/// `full_hash(name_bytes || identity_hash)` truncated to the address size.
pub fn destination_hash(name: &DestinationName, identity_hash: &Hash) -> AddressHash {
    AddressHash::from_hash(&Hash::from_digest(
        Hash::hasher().chain_update(name.name_bytes()).chain_update(identity_hash.as_slice()),
    ))
}

/// A named endpoint owned by an identity. `In` destinations carry private
/// key material and can announce; `Out` destinations describe a remote
/// endpoint learned from an announce.
#[derive(Clone)]
pub struct Destination {
    pub name: DestinationName,
    pub direction: Direction,
    pub kind: Kind,
    pub identity: Identity,
    pub hash: AddressHash,
}

impl Destination {
    pub fn new_out(name: DestinationName, kind: Kind, identity: Identity) -> Self {
        let hash = destination_hash(&name, identity.hash());
        Self { name, direction: Direction::Out, kind, identity, hash }
    }
}

pub struct InDestination {
    pub destination: Destination,
    identity: PrivateIdentity,
}

impl InDestination {
    pub fn new(name: DestinationName, kind: Kind, identity: PrivateIdentity) -> Self {
        let hash = destination_hash(&name, identity.hash());
        let destination = Destination {
            name,
            direction: Direction::In,
            kind,
            identity: *identity.identity(),
            hash,
        };
        Self { destination, identity }
    }

    pub fn hash(&self) -> &AddressHash {
        &self.destination.hash
    }

    pub fn identity(&self) -> &PrivateIdentity {
        &self.identity
    }

    /// Builds a signed announce packet for this destination.
    ///
    /// Payload layout: `public_material(64) || signature(64) || app_data`,
    /// signed over `destination_hash || public_material || app_data`.
    pub fn announce_packet(&self, app_data: Option<&[u8]>) -> Packet {
        let material = self.identity.identity().public_material();
        let app_data = app_data.unwrap_or(&[]);

        let mut signed = Vec::with_capacity(
            self.destination.hash.as_slice().len() + material.len() + app_data.len(),
        );
        signed.extend_from_slice(self.destination.hash.as_slice());
        signed.extend_from_slice(&material);
        signed.extend_from_slice(app_data);

        let signature = self.identity.sign(&signed);

        let mut data = Vec::with_capacity(material.len() + SIGNATURE_SIZE + app_data.len());
        data.extend_from_slice(&material);
        data.extend_from_slice(&signature.to_bytes());
        data.extend_from_slice(app_data);

        Packet {
            header: PacketHeader { packet_type: PacketType::Announce, ..Default::default() },
            destination: self.destination.hash,
            data: Bytes::from_vec(data),
            ..Default::default()
        }
    }
}

/// Validated contents of an announce packet.
pub struct AnnounceInfo {
    pub identity: Identity,
    pub app_data: Vec<u8>,
}

impl AnnounceInfo {
    /// Checks the announce signature against the announced public material.
    pub fn validate(packet: &Packet) -> Result<Self, WeftError> {
        if packet.header.packet_type != PacketType::Announce {
            return Err(WeftError::InvalidArgument);
        }

        let data = packet.data.as_slice();
        if data.len() < PUBLIC_MATERIAL_SIZE + SIGNATURE_SIZE {
            return Err(WeftError::PacketError);
        }

        let material = &data[..PUBLIC_MATERIAL_SIZE];
        let signature_bytes = &data[PUBLIC_MATERIAL_SIZE..PUBLIC_MATERIAL_SIZE + SIGNATURE_SIZE];
        let app_data = &data[PUBLIC_MATERIAL_SIZE + SIGNATURE_SIZE..];

        let identity = Identity::from_public_material(material)?;

        let mut signed =
            Vec::with_capacity(packet.destination.as_slice().len() + material.len() + app_data.len());
        signed.extend_from_slice(packet.destination.as_slice());
        signed.extend_from_slice(material);
        signed.extend_from_slice(app_data);

        let signature = Signature::from_slice(signature_bytes)
            .map_err(|_| WeftError::IncorrectSignature)?;
        identity.verify(&signed, &signature)?;

        Ok(Self { identity, app_data: app_data.to_vec() })
    }
}

use ed25519_dalek::Signature;

use weft_core::hash::{full_hash, AddressHash, Hash, ADDRESS_SIZE};
use weft_core::identity::{Identity, PrivateIdentity, SIGNATURE_SIZE};
use weft_core::WeftError;

use crate::error::StoreError;

const PACKED_MIN: usize = 2 * ADDRESS_SIZE + SIGNATURE_SIZE;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum MessageState {
    Draft = 0,
    Outbound = 1,
    Sent = 2,
    Delivered = 3,
    Failed = 4,
}

impl MessageState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Outbound,
            2 => Self::Sent,
            3 => Self::Delivered,
            4 => Self::Failed,
            _ => Self::Draft,
        }
    }
}

/// One LXMF message. The packed form is the full wire image
/// (`destination || source || signature || msgpack(timestamp, content)`),
/// kept verbatim so the hash and signature reproduce exactly on reload.
#[derive(Debug, Clone)]
pub struct LxMessage {
    pub hash: Hash,
    pub destination: AddressHash,
    pub source: AddressHash,
    pub timestamp: f64,
    pub content: String,
    pub incoming: bool,
    pub state: MessageState,
    signature: [u8; SIGNATURE_SIZE],
    packed: Vec<u8>,
}

impl LxMessage {
    /// Builds and signs an outgoing message from our identity.
    pub fn new_outgoing(
        destination: AddressHash,
        source_identity: &PrivateIdentity,
        timestamp: f64,
        content: &str,
    ) -> Result<Self, StoreError> {
        let source = *source_identity.address_hash();
        let payload = rmp_serde::to_vec(&(timestamp, content))
            .map_err(|err| StoreError::Encode(err.to_string()))?;

        let mut hashed = Vec::with_capacity(2 * ADDRESS_SIZE + payload.len());
        hashed.extend_from_slice(destination.as_slice());
        hashed.extend_from_slice(source.as_slice());
        hashed.extend_from_slice(&payload);

        let hash = full_hash(&hashed);
        let signature = source_identity.sign(&hashed).to_bytes();

        let mut packed = Vec::with_capacity(PACKED_MIN + payload.len());
        packed.extend_from_slice(destination.as_slice());
        packed.extend_from_slice(source.as_slice());
        packed.extend_from_slice(&signature);
        packed.extend_from_slice(&payload);

        Ok(Self {
            hash,
            destination,
            source,
            timestamp,
            content: content.into(),
            incoming: false,
            state: MessageState::Draft,
            signature,
            packed,
        })
    }

    /// Rebuilds a message from its packed wire form. The signature is
    /// carried but not checked here; receipt already validated it, and
    /// [`LxMessage::verify`] re-checks on demand.
    pub fn unpack_from_bytes(packed: &[u8]) -> Result<Self, StoreError> {
        if packed.len() < PACKED_MIN {
            return Err(StoreError::Decode("packed message too short".into()));
        }

        let destination = AddressHash::from_slice(&packed[..ADDRESS_SIZE])
            .map_err(|_| StoreError::Decode("bad destination hash".into()))?;
        let source = AddressHash::from_slice(&packed[ADDRESS_SIZE..2 * ADDRESS_SIZE])
            .map_err(|_| StoreError::Decode("bad source hash".into()))?;

        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&packed[2 * ADDRESS_SIZE..PACKED_MIN]);

        let payload = &packed[PACKED_MIN..];
        let (timestamp, content): (f64, String) = rmp_serde::from_slice(payload)
            .map_err(|err| StoreError::Decode(err.to_string()))?;

        let mut hashed = Vec::with_capacity(2 * ADDRESS_SIZE + payload.len());
        hashed.extend_from_slice(destination.as_slice());
        hashed.extend_from_slice(source.as_slice());
        hashed.extend_from_slice(payload);

        Ok(Self {
            hash: full_hash(&hashed),
            destination,
            source,
            timestamp,
            content,
            incoming: true,
            state: MessageState::Delivered,
            signature,
            packed: packed.to_vec(),
        })
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    /// The conversation peer: source for incoming, destination for
    /// outgoing.
    pub fn peer_hash(&self) -> AddressHash {
        if self.incoming {
            self.source
        } else {
            self.destination
        }
    }

    /// Checks the carried signature against the claimed source identity.
    pub fn verify(&self, source: &Identity) -> Result<(), WeftError> {
        let payload = &self.packed[PACKED_MIN..];
        let mut hashed = Vec::with_capacity(2 * ADDRESS_SIZE + payload.len());
        hashed.extend_from_slice(self.destination.as_slice());
        hashed.extend_from_slice(self.source.as_slice());
        hashed.extend_from_slice(payload);

        let signature = Signature::from_slice(&self.signature)
            .map_err(|_| WeftError::IncorrectSignature)?;
        source.verify(&hashed, &signature)
    }
}

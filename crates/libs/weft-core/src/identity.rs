use core::fmt;

use ed25519_dalek::ed25519::signature::Signer;
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use rand_core::CryptoRngCore;
use sha2::Digest;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::WeftError;
use crate::hash::{AddressHash, Hash};

pub const PUBLIC_KEY_SIZE: usize = 32;
pub const PUBLIC_MATERIAL_SIZE: usize = PUBLIC_KEY_SIZE * 2;
pub const PRIVATE_MATERIAL_SIZE: usize = PUBLIC_KEY_SIZE * 2;
pub const SIGNATURE_SIZE: usize = ed25519_dalek::SIGNATURE_LENGTH;

/// Public half of a Weft identity: an x25519 encryption key and an ed25519
/// verifying key. The identity hash is the full hash of both public keys;
/// its first 16 bytes are the stable address.
#[derive(Copy, Clone)]
pub struct Identity {
    pub public_key: PublicKey,
    pub verifying_key: VerifyingKey,
    hash: Hash,
    address_hash: AddressHash,
}

impl Identity {
    pub fn new(public_key: PublicKey, verifying_key: VerifyingKey) -> Self {
        let hash = Hash::from_digest(
            Hash::hasher().chain_update(public_key.as_bytes()).chain_update(verifying_key.as_bytes()),
        );
        let address_hash = AddressHash::from_hash(&hash);

        Self { public_key, verifying_key, hash, address_hash }
    }

    /// Rebuilds an identity from 64 bytes of announced public material.
    pub fn from_public_material(material: &[u8]) -> Result<Self, WeftError> {
        if material.len() != PUBLIC_MATERIAL_SIZE {
            return Err(WeftError::InvalidArgument);
        }

        let mut public_bytes = [0u8; PUBLIC_KEY_SIZE];
        public_bytes.copy_from_slice(&material[..PUBLIC_KEY_SIZE]);

        let mut verifying_bytes = [0u8; PUBLIC_KEY_SIZE];
        verifying_bytes.copy_from_slice(&material[PUBLIC_KEY_SIZE..]);

        let verifying_key =
            VerifyingKey::from_bytes(&verifying_bytes).map_err(|_| WeftError::CryptoError)?;

        Ok(Self::new(PublicKey::from(public_bytes), verifying_key))
    }

    pub fn public_material(&self) -> [u8; PUBLIC_MATERIAL_SIZE] {
        let mut material = [0u8; PUBLIC_MATERIAL_SIZE];
        material[..PUBLIC_KEY_SIZE].copy_from_slice(self.public_key.as_bytes());
        material[PUBLIC_KEY_SIZE..].copy_from_slice(self.verifying_key.as_bytes());
        material
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn address_hash(&self) -> &AddressHash {
        &self.address_hash
    }

    pub fn verify(&self, data: &[u8], signature: &Signature) -> Result<(), WeftError> {
        self.verifying_key.verify_strict(data, signature).map_err(|_| WeftError::IncorrectSignature)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address_hash)
    }
}

/// An identity with its private key material, able to sign and announce.
#[derive(Clone)]
pub struct PrivateIdentity {
    identity: Identity,
    encryption_key: StaticSecret,
    signing_key: SigningKey,
}

impl PrivateIdentity {
    pub fn generate<R: CryptoRngCore>(mut rng: R) -> Self {
        let encryption_key = StaticSecret::random_from_rng(&mut rng);
        let signing_key = SigningKey::generate(&mut rng);

        let identity =
            Identity::new(PublicKey::from(&encryption_key), signing_key.verifying_key());

        Self { identity, encryption_key, signing_key }
    }

    /// Restores an identity from its 64-byte private material
    /// (x25519 secret followed by ed25519 seed).
    pub fn from_private_material(material: &[u8]) -> Result<Self, WeftError> {
        if material.len() != PRIVATE_MATERIAL_SIZE {
            return Err(WeftError::InvalidArgument);
        }

        let mut encryption_bytes = [0u8; PUBLIC_KEY_SIZE];
        encryption_bytes.copy_from_slice(&material[..PUBLIC_KEY_SIZE]);
        let encryption_key = StaticSecret::from(encryption_bytes);

        let mut signing_bytes = [0u8; PUBLIC_KEY_SIZE];
        signing_bytes.copy_from_slice(&material[PUBLIC_KEY_SIZE..]);
        let signing_key = SigningKey::from_bytes(&signing_bytes);

        let identity =
            Identity::new(PublicKey::from(&encryption_key), signing_key.verifying_key());

        Ok(Self { identity, encryption_key, signing_key })
    }

    pub fn private_material(&self) -> [u8; PRIVATE_MATERIAL_SIZE] {
        let mut material = [0u8; PRIVATE_MATERIAL_SIZE];
        material[..PUBLIC_KEY_SIZE].copy_from_slice(&self.encryption_key.to_bytes());
        material[PUBLIC_KEY_SIZE..].copy_from_slice(&self.signing_key.to_bytes());
        material
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn address_hash(&self) -> &AddressHash {
        self.identity.address_hash()
    }

    pub fn hash(&self) -> &Hash {
        self.identity.hash()
    }

    pub fn sign(&self, data: &[u8]) -> Signature {
        self.signing_key.sign(data)
    }

    pub fn shared_secret(&self, peer: &PublicKey) -> [u8; 32] {
        self.encryption_key.diffie_hellman(peer).to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use rand_core::OsRng;

    use super::*;

    #[test]
    fn private_material_roundtrip_keeps_address() {
        let original = PrivateIdentity::generate(OsRng);
        let restored = PrivateIdentity::from_private_material(&original.private_material())
            .expect("valid material");

        assert_eq!(restored.address_hash(), original.address_hash());
        assert_eq!(restored.hash(), original.hash());
    }

    #[test]
    fn sign_verify_roundtrip() {
        let signer = PrivateIdentity::generate(OsRng);
        let signature = signer.sign(b"announce body");

        let remote = Identity::from_public_material(&signer.identity().public_material())
            .expect("valid public material");
        assert!(remote.verify(b"announce body", &signature).is_ok());
        assert_eq!(remote.verify(b"tampered", &signature), Err(WeftError::IncorrectSignature));
    }

    #[test]
    fn address_is_hash_prefix() {
        let identity = PrivateIdentity::generate(OsRng);
        assert_eq!(
            identity.address_hash().as_slice(),
            &identity.hash().as_slice()[..crate::hash::ADDRESS_SIZE]
        );
    }
}

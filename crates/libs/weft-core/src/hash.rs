use core::fmt;

use sha2::{Digest, Sha256};

use crate::error::WeftError;

pub const HASH_SIZE: usize = 32;
pub const ADDRESS_SIZE: usize = 16;

/// Full SHA-256 digest of `data`.
pub fn full_hash(data: &[u8]) -> Hash {
    Hash(Sha256::new().chain_update(data).finalize().into())
}

/// First [`ADDRESS_SIZE`] bytes of the full hash of `data`.
pub fn truncated_hash(data: &[u8]) -> AddressHash {
    AddressHash::from_hash(&full_hash(data))
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub struct Hash([u8; HASH_SIZE]);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub struct AddressHash([u8; ADDRESS_SIZE]);

impl Hash {
    pub fn hasher() -> Sha256 {
        Sha256::new()
    }

    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub const fn zero() -> Self {
        Self([0u8; HASH_SIZE])
    }

    pub fn of(data: &[u8]) -> Self {
        full_hash(data)
    }

    pub fn from_digest(digest: Sha256) -> Self {
        Self(digest.finalize().into())
    }

    pub fn from_hex(hex_string: &str) -> Result<Self, WeftError> {
        let mut bytes = [0u8; HASH_SIZE];
        hex::decode_to_slice(hex_string, &mut bytes).map_err(|_| WeftError::IncorrectHash)?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub const fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
}

impl AddressHash {
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    pub const fn zero() -> Self {
        Self([0u8; ADDRESS_SIZE])
    }

    pub fn of(data: &[u8]) -> Self {
        truncated_hash(data)
    }

    /// Truncates a full hash to its leading address bytes.
    pub fn from_hash(hash: &Hash) -> Self {
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&hash.0[..ADDRESS_SIZE]);
        Self(bytes)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, WeftError> {
        if data.len() != ADDRESS_SIZE {
            return Err(WeftError::IncorrectHash);
        }
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(data);
        Ok(Self(bytes))
    }

    pub fn from_hex(hex_string: &str) -> Result<Self, WeftError> {
        let mut bytes = [0u8; ADDRESS_SIZE];
        hex::decode_to_slice(hex_string, &mut bytes).map_err(|_| WeftError::IncorrectHash)?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub const fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }
}

impl From<Hash> for AddressHash {
    fn from(hash: Hash) -> Self {
        Self::from_hash(&hash)
    }
}

impl Default for AddressHash {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Display for AddressHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for byte in self.0.iter() {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ">")
    }
}

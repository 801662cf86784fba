//! Protocol core for the Weft mesh runtime.

pub mod bytes;
pub mod crypt;
pub mod destination;
mod error;
pub mod hash;
pub mod identity;
pub mod key_store;
pub mod packet;

pub use bytes::{Bytes, BytesPool};
pub use error::WeftError;
pub use hash::{full_hash, truncated_hash, AddressHash, Hash};
pub use identity::{Identity, PrivateIdentity};
pub use packet::Packet;

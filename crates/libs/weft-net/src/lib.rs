//! Transport runtime for the Weft mesh: interface plumbing, IPv6
//! link-local auto-discovery, the transport core, and the multi-segment
//! resource accumulator.

pub mod iface;
pub mod resource;
pub mod transport;

pub use iface::{InterfaceChannel, InterfaceManager, RxMessage, TxMessage};
pub use transport::{Transport, TransportConfig};

//! BLE link layer: fragments Weft packets across the link MTU, reassembles
//! them keyed by stable peer identity, and runs the identity handshake that
//! survives MAC address rotation.

pub mod driver;
pub mod fragment;
pub mod identity;
pub mod peers;
pub mod reassembler;

pub use driver::{BleEvent, BleInterface, BleInterfaceConfig, BlePlatform};
pub use fragment::{fragment, FragmentError, FragmentHeader, FragmentType};
pub use identity::{IdentityManager, MacAddress};
pub use reassembler::Reassembler;

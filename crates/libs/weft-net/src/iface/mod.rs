pub mod auto;
pub mod dedup;
pub mod hdlc;
pub mod tcp_client;
pub mod udp;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use weft_core::hash::{truncated_hash, AddressHash};

pub use dedup::DedupDeque;

pub type IfaceTxSender = mpsc::Sender<TxMessage>;
pub type IfaceTxReceiver = mpsc::Receiver<TxMessage>;
pub type IfaceRxSender = mpsc::Sender<RxMessage>;
pub type IfaceRxReceiver = mpsc::Receiver<RxMessage>;

const IFACE_TX_QUEUE_CAPACITY: usize = 128;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum TxTarget {
    /// Every interface, optionally excluding one (the ingress).
    Broadcast(Option<AddressHash>),
    Direct(AddressHash),
}

/// Encoded packet on its way out to interface workers.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TxMessage {
    pub target: TxTarget,
    pub raw: Vec<u8>,
}

/// Raw frame delivered by an interface worker. The transport parses and
/// fingerprints it; interfaces only move bytes.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RxMessage {
    pub iface: AddressHash,
    pub raw: Vec<u8>,
}

/// Channel bundle handed to an interface worker.
pub struct InterfaceChannel {
    pub address: AddressHash,
    pub rx: IfaceRxSender,
    pub tx: IfaceTxReceiver,
    pub stop: CancellationToken,
}

impl InterfaceChannel {
    pub fn address(&self) -> &AddressHash {
        &self.address
    }

    pub fn split(self) -> (IfaceRxSender, IfaceTxReceiver) {
        (self.rx, self.tx)
    }
}

/// Outcome of one tx fan-out; failures feed the retransmission queue.
#[derive(Debug, Default, Clone)]
pub struct DispatchReport {
    pub sent: Vec<AddressHash>,
    pub failed: Vec<AddressHash>,
}

struct RegisteredInterface {
    address: AddressHash,
    tx: IfaceTxSender,
    stop: CancellationToken,
}

/// Owns the registered interfaces: assigns each an address, fans tx
/// messages out, funnels all rx frames into one shared channel.
pub struct InterfaceManager {
    counter: usize,
    rx_send: IfaceRxSender,
    interfaces: Vec<RegisteredInterface>,
}

impl InterfaceManager {
    pub fn new(rx_capacity: usize) -> (Self, IfaceRxReceiver) {
        let (rx_send, rx_recv) = mpsc::channel(rx_capacity);
        (Self { counter: 0, rx_send, interfaces: Vec::new() }, rx_recv)
    }

    /// Registers an interface and returns the channel bundle its worker
    /// drives. Addresses are derived from a registration counter.
    pub fn attach(&mut self) -> InterfaceChannel {
        self.counter += 1;
        let address = truncated_hash(&self.counter.to_le_bytes());

        let (tx_send, tx_recv) = mpsc::channel(IFACE_TX_QUEUE_CAPACITY);
        let stop = CancellationToken::new();

        log::debug!("iface: attached {}", address);

        self.interfaces.push(RegisteredInterface { address, tx: tx_send, stop: stop.clone() });

        InterfaceChannel { address, rx: self.rx_send.clone(), tx: tx_recv, stop }
    }

    /// Drops interfaces whose workers have stopped.
    pub fn cleanup(&mut self) {
        self.interfaces.retain(|iface| !iface.stop.is_cancelled());
    }

    pub fn detach_all(&mut self) {
        for iface in &self.interfaces {
            iface.stop.cancel();
        }
        self.interfaces.clear();
    }

    pub fn addresses(&self) -> Vec<AddressHash> {
        self.interfaces.iter().map(|iface| iface.address).collect()
    }

    pub fn dispatch(&self, message: &TxMessage) -> DispatchReport {
        let mut report = DispatchReport::default();

        for iface in &self.interfaces {
            let matched = match message.target {
                TxTarget::Broadcast(exclude) => exclude != Some(iface.address),
                TxTarget::Direct(address) => address == iface.address,
            };

            if !matched || iface.stop.is_cancelled() {
                continue;
            }

            match iface.tx.try_send(TxMessage {
                target: TxTarget::Direct(iface.address),
                raw: message.raw.clone(),
            }) {
                Ok(()) => report.sent.push(iface.address),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("iface: tx queue full on {}", iface.address);
                    report.failed.push(iface.address);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    log::warn!("iface: tx queue closed on {}", iface.address);
                    report.failed.push(iface.address);
                }
            }
        }

        report
    }
}

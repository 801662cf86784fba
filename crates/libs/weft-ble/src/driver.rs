use std::time::{Duration, Instant};

use weft_core::hash::AddressHash;
use weft_net::iface::{InterfaceChannel, RxMessage};

use crate::fragment;
use crate::identity::{IdentityManager, MacAddress};
use crate::peers::BlePeerTable;
use crate::reassembler::{FragmentOutcome, Reassembler};

#[derive(Debug, thiserror::Error)]
#[error("ble platform: {message}")]
pub struct BlePlatformError {
    pub message: String,
    pub retryable: bool,
}

impl BlePlatformError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: true }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: false }
    }
}

/// Connection and data events surfaced by a platform BLE stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleEvent {
    Connected { mac: MacAddress, is_central: bool },
    Disconnected { mac: MacAddress },
    Data { mac: MacAddress, data: Vec<u8> },
}

/// Boundary to the platform BLE stack. The core consumes byte-level
/// connection/data events and writes characteristic values; scanning,
/// advertising, and GATT plumbing stay on the platform side.
#[allow(async_fn_in_trait)]
pub trait BlePlatform {
    fn platform_name(&self) -> &'static str;

    /// Next event from the stack; `None` when the stack has shut down.
    async fn next_event(&mut self) -> Option<BleEvent>;

    /// Writes one value to the peer's RX characteristic.
    async fn write(&mut self, mac: MacAddress, data: &[u8]) -> Result<(), BlePlatformError>;
}

#[derive(Debug, Clone)]
pub struct BleInterfaceConfig {
    pub mtu: usize,
    pub reassembly_timeout: Duration,
    pub handshake_timeout: Duration,
    pub peer_stale_timeout: Duration,
}

impl Default for BleInterfaceConfig {
    fn default() -> Self {
        Self {
            mtu: 247,
            reassembly_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            peer_stale_timeout: Duration::from_secs(60),
        }
    }
}

/// BLE interface worker: handshake detection, fragment reassembly keyed by
/// peer identity, and MTU fragmentation of outgoing packets.
pub struct BleInterface<P: BlePlatform> {
    platform: P,
    config: BleInterfaceConfig,
    identity_manager: IdentityManager,
    reassembler: Reassembler,
    peers: BlePeerTable,
}

impl<P: BlePlatform> BleInterface<P> {
    pub fn new(platform: P, local_identity: AddressHash, config: BleInterfaceConfig) -> Self {
        let mut identity_manager = IdentityManager::new(local_identity);
        identity_manager.set_timeout(config.handshake_timeout);

        let mut reassembler = Reassembler::new();
        reassembler.set_timeout(config.reassembly_timeout);

        let peers = BlePeerTable::new(config.peer_stale_timeout);

        Self { platform, config, identity_manager, reassembler, peers }
    }

    pub async fn run(self, channel: InterfaceChannel) {
        let Self { mut platform, config, mut identity_manager, mut reassembler, mut peers } = self;

        let iface_address = channel.address;
        let stop = channel.stop.clone();
        let (rx_channel, mut tx_channel) = channel.split();

        log::info!("ble({}): worker up, mtu {}", platform.platform_name(), config.mtu);

        let mut tick = tokio::time::interval(Duration::from_millis(500));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                event = platform.next_event() => {
                    let Some(event) = event else {
                        log::warn!("ble({}): platform stopped", platform.platform_name());
                        break;
                    };
                    let now = Instant::now();

                    match event {
                        BleEvent::Connected { mac, is_central } => {
                            peers.connected(mac, is_central, now);
                            if is_central {
                                // Central speaks first: its identity opens the link
                                let hello = identity_manager.initiate_handshake(mac, now);
                                if let Err(err) = platform.write(mac, &hello).await {
                                    log::warn!("ble: identity write to {} failed: {}", mac, err);
                                    peers.send_failed(&mac);
                                }
                            }
                        }
                        BleEvent::Disconnected { mac } => {
                            peers.disconnected(&mac);
                            identity_manager.remove_mapping(&mac);
                        }
                        BleEvent::Data { mac, data } => {
                            peers.heard(&mac, now);
                            let is_central = peers.is_central(&mac);

                            if identity_manager.process_received(mac, &data, is_central, now) {
                                if let Some(identity) = identity_manager.identity_for_mac(&mac) {
                                    peers.set_identity(&mac, *identity);
                                }
                                continue;
                            }

                            let Some(identity) = identity_manager.identity_for_mac(&mac).copied()
                            else {
                                log::debug!("ble: data from {} before handshake, dropped", mac);
                                continue;
                            };

                            if let FragmentOutcome::Completed(packet) =
                                reassembler.process_fragment(identity, &data, now)
                            {
                                let message = RxMessage { iface: iface_address, raw: packet };
                                if rx_channel.send(message).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
                maybe_message = tx_channel.recv() => {
                    let Some(message) = maybe_message else { break };

                    let fragments = match fragment::fragment(&message.raw, config.mtu) {
                        Ok(fragments) => fragments,
                        Err(err) => {
                            log::warn!("ble: cannot fragment outgoing packet: {}", err);
                            continue;
                        }
                    };

                    for mac in peers.sendable() {
                        for piece in &fragments {
                            if let Err(err) = platform.write(mac, piece).await {
                                log::warn!("ble: write to {} failed: {}", mac, err);
                                peers.send_failed(&mac);
                                break;
                            }
                        }
                    }
                }
                _ = tick.tick() => {
                    let now = Instant::now();
                    reassembler.check_timeouts(now);
                    identity_manager.check_timeouts(now);
                    peers.evict_stale(now);
                }
            }
        }

        log::info!("ble: worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use weft_core::hash::truncated_hash;
    use weft_net::iface::TxMessage;

    use super::*;

    struct MockPlatform {
        events: VecDeque<BleEvent>,
        writes: mpsc::UnboundedSender<(MacAddress, Vec<u8>)>,
    }

    impl BlePlatform for MockPlatform {
        fn platform_name(&self) -> &'static str {
            "mock"
        }

        async fn next_event(&mut self) -> Option<BleEvent> {
            match self.events.pop_front() {
                Some(event) => Some(event),
                // Keep the worker parked once scripted events run out
                None => std::future::pending().await,
            }
        }

        async fn write(
            &mut self,
            mac: MacAddress,
            data: &[u8],
        ) -> Result<(), BlePlatformError> {
            self.writes.send((mac, data.to_vec())).map_err(|_| {
                BlePlatformError::terminal("write sink closed")
            })
        }
    }

    fn mac(value: u8) -> MacAddress {
        MacAddress([value; 6])
    }

    fn harness(
        events: Vec<BleEvent>,
    ) -> (
        BleInterface<MockPlatform>,
        mpsc::UnboundedReceiver<(MacAddress, Vec<u8>)>,
        InterfaceChannel,
        mpsc::Receiver<RxMessage>,
        mpsc::Sender<TxMessage>,
    ) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let platform = MockPlatform { events: events.into(), writes: write_tx };

        let interface = BleInterface::new(
            platform,
            truncated_hash(b"local identity"),
            BleInterfaceConfig { mtu: 50, ..Default::default() },
        );

        let (rx_tx, rx_rx) = mpsc::channel(16);
        let (tx_tx, tx_rx) = mpsc::channel(16);
        let channel = InterfaceChannel {
            address: truncated_hash(b"ble iface"),
            rx: rx_tx,
            tx: tx_rx,
            stop: CancellationToken::new(),
        };

        (interface, write_rx, channel, rx_rx, tx_tx)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn central_writes_identity_on_connect() {
        let (interface, mut writes, channel, _rx, _tx) =
            harness(vec![BleEvent::Connected { mac: mac(1), is_central: true }]);

        let stop = channel.stop.clone();
        let worker = tokio::spawn(interface.run(channel));

        let (to, payload) = writes.recv().await.expect("identity write");
        assert_eq!(to, mac(1));
        assert_eq!(payload, truncated_hash(b"local identity").as_slice());

        stop.cancel();
        worker.await.expect("worker exit");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn handshake_then_fragments_deliver_packet_upstream() {
        let peer_identity = truncated_hash(b"peer identity");
        let packet = vec![0x42u8; 120];
        let pieces = fragment::fragment(&packet, 50).expect("fragmentable");

        let mut events = vec![
            BleEvent::Connected { mac: mac(2), is_central: false },
            BleEvent::Data { mac: mac(2), data: peer_identity.as_slice().to_vec() },
        ];
        events.extend(
            pieces.iter().map(|piece| BleEvent::Data { mac: mac(2), data: piece.clone() }),
        );

        let (interface, _writes, channel, mut rx, _tx) = harness(events);
        let stop = channel.stop.clone();
        let worker = tokio::spawn(interface.run(channel));

        let delivered = rx.recv().await.expect("reassembled packet");
        assert_eq!(delivered.raw, packet);

        stop.cancel();
        worker.await.expect("worker exit");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn data_before_handshake_is_dropped() {
        let packet = fragment::fragment(b"hello", 50).expect("fragmentable");

        let (interface, _writes, channel, mut rx, _tx) = harness(vec![
            BleEvent::Connected { mac: mac(3), is_central: false },
            // 10 bytes: not a handshake, and no identity mapped yet
            BleEvent::Data { mac: mac(3), data: packet[0].clone() },
        ]);
        let stop = channel.stop.clone();
        let worker = tokio::spawn(interface.run(channel));

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        stop.cancel();
        worker.await.expect("worker exit");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn outgoing_packets_are_fragmented_per_sendable_peer() {
        let peer_identity = truncated_hash(b"peer identity");

        let (interface, mut writes, channel, _rx, tx) = harness(vec![
            BleEvent::Connected { mac: mac(4), is_central: false },
            BleEvent::Data { mac: mac(4), data: peer_identity.as_slice().to_vec() },
        ]);
        let stop = channel.stop.clone();
        let worker = tokio::spawn(interface.run(channel));

        // Let the handshake land before queueing the send
        tokio::task::yield_now().await;

        let outgoing = vec![0x17u8; 100];
        tx.send(TxMessage {
            target: weft_net::iface::TxTarget::Direct(truncated_hash(b"ble iface")),
            raw: outgoing.clone(),
        })
        .await
        .expect("queued");

        let mut received = Vec::new();
        for _ in 0..3 {
            let (to, piece) = writes.recv().await.expect("fragment write");
            assert_eq!(to, mac(4));
            let (_, payload) = fragment::parse(&piece).expect("parsable");
            received.extend_from_slice(payload);
        }
        assert_eq!(received, outgoing);

        stop.cancel();
        worker.await.expect("worker exit");
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use super::{InterfaceChannel, RxMessage};

const DATAGRAM_BUFFER_SIZE: usize = 4096;
const REBIND_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct UdpInterfaceConfig {
    pub bind_addr: String,
    /// Peer endpoint for outgoing packets; receive-only without one.
    pub forward_addr: Option<String>,
}

impl UdpInterfaceConfig {
    pub fn new(bind_addr: impl Into<String>, forward_addr: Option<String>) -> Self {
        Self { bind_addr: bind_addr.into(), forward_addr }
    }
}

/// Point-to-point UDP interface: one packet per datagram, no framing.
pub struct UdpInterface {
    config: UdpInterfaceConfig,
    online: Arc<AtomicBool>,
}

impl UdpInterface {
    pub fn new(config: UdpInterfaceConfig) -> Self {
        Self { config, online: Arc::new(AtomicBool::new(false)) }
    }

    pub fn online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    pub fn online_handle(&self) -> Arc<AtomicBool> {
        self.online.clone()
    }

    pub async fn run(self, channel: InterfaceChannel) {
        let iface_address = channel.address;
        let stop = channel.stop.clone();
        let (rx_channel, mut tx_channel) = channel.split();

        let socket = loop {
            if stop.is_cancelled() {
                return;
            }

            match UdpSocket::bind(&self.config.bind_addr).await {
                Ok(socket) => break socket,
                Err(err) => {
                    log::info!("udp: couldn't bind <{}>: {}", self.config.bind_addr, err);
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = tokio::time::sleep(REBIND_DELAY) => {}
                    }
                }
            }
        };

        log::info!("udp: bound to <{}>", self.config.bind_addr);
        self.online.store(true, Ordering::Relaxed);

        let mut buffer = [0u8; DATAGRAM_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                result = socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((0, _)) => continue,
                        Ok((n, _src)) => {
                            let message =
                                RxMessage { iface: iface_address, raw: buffer[..n].to_vec() };
                            if rx_channel.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            log::warn!("udp: recv error: {}", err);
                        }
                    }
                }
                maybe_message = tx_channel.recv() => {
                    let Some(message) = maybe_message else { break };
                    let Some(forward_addr) = self.config.forward_addr.as_deref() else {
                        continue;
                    };

                    if let Err(err) = socket.send_to(&message.raw, forward_addr).await {
                        log::warn!("udp: send to <{}> failed: {}", forward_addr, err);
                    }
                }
            }
        }

        self.online.store(false, Ordering::Relaxed);
        log::info!("udp: <{}> closed", self.config.bind_addr);
    }
}

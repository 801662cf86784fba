use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::hdlc;
use super::{InterfaceChannel, RxMessage};

const READ_BUFFER_SIZE: usize = 4096;
// Cap stream buffering when no valid frame ever closes
const FRAME_BUFFER_LIMIT: usize = READ_BUFFER_SIZE * 64;

#[derive(Debug, Clone)]
pub struct TcpClientConfig {
    pub addr: String,
    pub reconnect_delay: Duration,
}

impl TcpClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), reconnect_delay: Duration::from_secs(5) }
    }
}

/// HDLC-framed TCP interface. Reconnects with a fixed delay; a lost
/// connection drops queued traffic to the retransmission layer above.
pub struct TcpClient {
    config: TcpClientConfig,
    online: Arc<AtomicBool>,
}

impl TcpClient {
    pub fn new(config: TcpClientConfig) -> Self {
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

        loop {
            if stop.is_cancelled() {
                break;
            }

            let mut stream = match TcpStream::connect(&self.config.addr).await {
                Ok(stream) => stream,
                Err(err) => {
                    log::info!("tcp: couldn't connect to <{}>: {}", self.config.addr, err);
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(self.config.reconnect_delay) => continue,
                    }
                }
            };

            log::info!("tcp: connected to <{}>", self.config.addr);
            self.online.store(true, Ordering::Relaxed);

            let (mut reader, mut writer) = stream.split();
            let mut read_buffer = [0u8; READ_BUFFER_SIZE];
            let mut frame_buffer: Vec<u8> = Vec::with_capacity(READ_BUFFER_SIZE);

            loop {
                tokio::select! {
                    _ = stop.cancelled() => {
                        self.online.store(false, Ordering::Relaxed);
                        return;
                    }
                    result = reader.read(&mut read_buffer) => {
                        match result {
                            Ok(0) => {
                                log::warn!("tcp: connection closed by <{}>", self.config.addr);
                                break;
                            }
                            Ok(n) => {
                                // TCP delivers partial and coalesced frames
                                frame_buffer.extend_from_slice(&read_buffer[..n]);

                                while let Some((start, end)) = hdlc::find_frame(&frame_buffer) {
                                    match hdlc::decode(&frame_buffer[start..=end]) {
                                        Ok(raw) if !raw.is_empty() => {
                                            let message =
                                                RxMessage { iface: iface_address, raw };
                                            if rx_channel.send(message).await.is_err() {
                                                self.online.store(false, Ordering::Relaxed);
                                                return;
                                            }
                                        }
                                        Ok(_) => {}
                                        Err(err) => {
                                            log::warn!("tcp: bad frame: {:?}", err);
                                        }
                                    }
                                    frame_buffer.drain(..=end);
                                }

                                if frame_buffer.len() > FRAME_BUFFER_LIMIT {
                                    frame_buffer.clear();
                                }
                            }
                            Err(err) => {
                                log::warn!("tcp: read error: {}", err);
                                break;
                            }
                        }
                    }
                    maybe_message = tx_channel.recv() => {
                        let Some(message) = maybe_message else {
                            self.online.store(false, Ordering::Relaxed);
                            return;
                        };

                        let framed = hdlc::encode(&message.raw);
                        if let Err(err) = writer.write_all(&framed).await {
                            log::warn!("tcp: write failed: {}", err);
                            break;
                        }
                        if let Err(err) = writer.flush().await {
                            log::warn!("tcp: flush failed: {}", err);
                            break;
                        }
                    }
                }
            }

            self.online.store(false, Ordering::Relaxed);
            log::info!("tcp: disconnected from <{}>", self.config.addr);
        }
    }
}

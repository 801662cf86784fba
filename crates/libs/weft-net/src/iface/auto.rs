use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use weft_core::hash::{full_hash, Hash, HASH_SIZE};

use super::dedup::DedupDeque;
use super::{InterfaceChannel, RxMessage};

pub const DISCOVERY_TOKEN_SIZE: usize = HASH_SIZE;

#[derive(Debug, Clone)]
pub struct AutoInterfaceConfig {
    pub group_id: String,
    pub discovery_port: u16,
    pub data_port: u16,
    /// Restrict link-local discovery to this OS interface.
    pub interface_name: Option<String>,
    /// Skip OS lookup entirely and use this (address, scope id) pair.
    pub link_local_override: Option<(Ipv6Addr, u32)>,
    pub announce_interval: Duration,
    pub peer_timeout: Duration,
    pub deque_size: usize,
    pub deque_ttl: Duration,
}

impl Default for AutoInterfaceConfig {
    fn default() -> Self {
        Self {
            group_id: "default".into(),
            discovery_port: 29716,
            data_port: 42671,
            interface_name: None,
            link_local_override: None,
            announce_interval: Duration::from_secs(2),
            peer_timeout: Duration::from_secs(10),
            deque_size: 64,
            deque_ttl: Duration::from_secs(2),
        }
    }
}

/// Multicast group for a discovery group id: `ff12::/16` (transient,
/// link-local scope) with zeroed first group, then the first 12 bytes of
/// `full_hash(group_id)` in network order.
pub fn multicast_group(group_id: &str) -> Ipv6Addr {
    let group_hash = full_hash(group_id.as_bytes());

    let mut octets = [0u8; 16];
    octets[0] = 0xff;
    octets[1] = 0x12;
    octets[4..16].copy_from_slice(&group_hash.as_slice()[..12]);

    Ipv6Addr::from(octets)
}

/// `full_hash(group_id || utf8(link_local_address_string))`: proves group
/// membership without revealing the group id to casual observers.
pub fn discovery_token(group_id: &str, link_local: &str) -> Hash {
    let mut input = Vec::with_capacity(group_id.len() + link_local.len());
    input.extend_from_slice(group_id.as_bytes());
    input.extend_from_slice(link_local.as_bytes());
    full_hash(&input)
}

#[derive(Debug, Clone)]
pub struct AutoPeer {
    pub address: Ipv6Addr,
    pub data_port: u16,
    pub last_heard: Instant,
    pub is_local_echo: bool,
}

/// Pure discovery/data-plane state driven by the socket worker, kept
/// separate so the protocol rules are testable without sockets.
pub struct AutoInterfaceState {
    group_id: String,
    own_address: Ipv6Addr,
    data_port: u16,
    peer_timeout: Duration,
    announce_interval: Duration,
    token: Hash,
    peers: Vec<AutoPeer>,
    dedup: DedupDeque,
    last_announce: Option<Instant>,
}

impl AutoInterfaceState {
    pub fn new(config: &AutoInterfaceConfig, own_address: Ipv6Addr) -> Self {
        Self {
            group_id: config.group_id.clone(),
            own_address,
            data_port: config.data_port,
            peer_timeout: config.peer_timeout,
            announce_interval: config.announce_interval,
            token: discovery_token(&config.group_id, &own_address.to_string()),
            peers: Vec::new(),
            dedup: DedupDeque::new(config.deque_size, config.deque_ttl),
            last_announce: None,
        }
    }

    pub fn token(&self) -> &Hash {
        &self.token
    }

    pub fn peers(&self) -> &[AutoPeer] {
        &self.peers
    }

    /// Returns the token to multicast when the announce interval elapsed.
    pub fn announce_due(&mut self, now: Instant) -> Option<[u8; DISCOVERY_TOKEN_SIZE]> {
        let due = match self.last_announce {
            Some(last) => now.duration_since(last) >= self.announce_interval,
            None => true,
        };

        if !due {
            return None;
        }

        self.last_announce = Some(now);
        Some(*self.token.as_bytes())
    }

    /// Verifies a discovery datagram against the expected token for its
    /// source address and refreshes or inserts the peer on a match.
    pub fn handle_discovery(&mut self, src: Ipv6Addr, data: &[u8], now: Instant) -> bool {
        if data.len() < DISCOVERY_TOKEN_SIZE {
            log::debug!("auto: short discovery datagram from {}", src);
            return false;
        }

        let expected = discovery_token(&self.group_id, &src.to_string());
        if &data[..DISCOVERY_TOKEN_SIZE] != expected.as_slice() {
            log::debug!("auto: invalid discovery hash from {}", src);
            return false;
        }

        let is_local_echo = src == self.own_address;

        if let Some(peer) = self.peers.iter_mut().find(|peer| peer.address == src) {
            peer.last_heard = now;
            log::trace!("auto: refreshed peer {}", src);
            return true;
        }

        self.peers.push(AutoPeer {
            address: src,
            data_port: self.data_port,
            last_heard: now,
            is_local_echo,
        });
        log::info!("auto: added peer {}{}", src, if is_local_echo { " (local echo)" } else { "" });
        true
    }

    /// Runs a data datagram through the dedup deque. True means new.
    pub fn handle_data(&mut self, data: &[u8], now: Instant) -> bool {
        if !self.dedup.observe(full_hash(data), now) {
            log::trace!("auto: dropping duplicate data packet");
            return false;
        }
        true
    }

    /// Unicast targets for one outgoing copy each; the local echo is skipped.
    pub fn unicast_targets(&self, scope_id: u32) -> Vec<SocketAddrV6> {
        self.peers
            .iter()
            .filter(|peer| !peer.is_local_echo)
            .map(|peer| SocketAddrV6::new(peer.address, peer.data_port, 0, scope_id))
            .collect()
    }

    /// Expires stale peers and old dedup entries.
    pub fn sweep(&mut self, now: Instant) {
        let timeout = self.peer_timeout;
        self.peers.retain(|peer| {
            let stale = now.duration_since(peer.last_heard) > timeout;
            if stale {
                log::info!("auto: removed stale peer {}", peer.address);
            }
            !stale
        });

        self.dedup.sweep(now);
    }
}

/// Self-configuring IPv6 link-local interface: multicast discovery plus a
/// unicast data plane.
pub struct AutoInterface {
    config: AutoInterfaceConfig,
    online: Arc<AtomicBool>,
}

struct Endpoint {
    link_local: Ipv6Addr,
    scope_id: u32,
    discovery: UdpSocket,
    data: Option<UdpSocket>,
}

impl AutoInterface {
    pub fn new(config: AutoInterfaceConfig) -> Self {
        Self { config, online: Arc::new(AtomicBool::new(false)) }
    }

    pub fn online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    pub fn online_handle(&self) -> Arc<AtomicBool> {
        self.online.clone()
    }

    /// Worker driving the interface until the channel is stopped. A fatal
    /// start failure logs, leaves `online()` false, and returns.
    pub async fn run(self, channel: InterfaceChannel) {
        let endpoint = match Self::start(&self.config) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                log::error!("auto: start failed: {}", err);
                return;
            }
        };

        self.online.store(true, Ordering::Relaxed);
        log::info!(
            "auto: online, group {}, link-local {}, data socket {}",
            multicast_group(&self.config.group_id),
            endpoint.link_local,
            if endpoint.data.is_some() { "yes" } else { "no (discovery-only)" },
        );

        let mut state = AutoInterfaceState::new(&self.config, endpoint.link_local);
        let group = SocketAddrV6::new(
            multicast_group(&self.config.group_id),
            self.config.discovery_port,
            0,
            endpoint.scope_id,
        );

        let iface_address = channel.address;
        let (rx_channel, mut tx_channel) = channel.split();

        let mut discovery_buf = [0u8; 1024];
        let mut data_buf = [0u8; 4096];
        let mut tick = tokio::time::interval(Duration::from_millis(250));

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let now = Instant::now();
                    if let Some(token) = state.announce_due(now) {
                        if let Err(err) = endpoint.discovery.send_to(&token, group).await {
                            log::warn!("auto: discovery announce failed: {}", err);
                        }
                    }
                    state.sweep(now);
                }
                result = endpoint.discovery.recv_from(&mut discovery_buf) => {
                    match result {
                        Ok((len, SocketAddr::V6(src))) => {
                            state.handle_discovery(*src.ip(), &discovery_buf[..len], Instant::now());
                        }
                        Ok(_) => {}
                        Err(err) => log::warn!("auto: discovery recv error: {}", err),
                    }
                }
                result = recv_or_pending(endpoint.data.as_ref(), &mut data_buf) => {
                    match result {
                        Ok((len, _src)) => {
                            if state.handle_data(&data_buf[..len], Instant::now()) {
                                let message = RxMessage {
                                    iface: iface_address,
                                    raw: data_buf[..len].to_vec(),
                                };
                                if rx_channel.send(message).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(err) => log::warn!("auto: data recv error: {}", err),
                    }
                }
                maybe_message = tx_channel.recv() => {
                    let Some(message) = maybe_message else { break };
                    let Some(data_socket) = endpoint.data.as_ref() else { continue };

                    for target in state.unicast_targets(endpoint.scope_id) {
                        if let Err(err) = data_socket.send_to(&message.raw, target).await {
                            // Transient: the peer stays until its timeout
                            log::warn!("auto: send to {} failed: {}", target, err);
                        }
                    }
                }
            }
        }

        self.online.store(false, Ordering::Relaxed);
        log::info!("auto: offline");
    }

    fn start(config: &AutoInterfaceConfig) -> io::Result<Endpoint> {
        let (link_local, scope_id) = match config.link_local_override {
            Some(pair) => pair,
            None => find_link_local(config.interface_name.as_deref()).ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no link-local IPv6 address")
            })?,
        };

        let group = multicast_group(&config.group_id);
        let discovery = bind_discovery_socket(group, config.discovery_port, scope_id)?;

        let data = match bind_data_socket(link_local, config.data_port, scope_id) {
            Ok(socket) => Some(socket),
            Err(err) => {
                // Another stack may own the data port; discovery still works
                log::warn!("auto: data socket bind failed ({}), discovery-only mode", err);
                None
            }
        };

        Ok(Endpoint { link_local, scope_id, discovery, data })
    }
}

async fn recv_or_pending(
    socket: Option<&UdpSocket>,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

fn bind_discovery_socket(group: Ipv6Addr, port: u16, scope_id: u32) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.set_multicast_if_v6(scope_id)?;
    socket.join_multicast_v6(&group, scope_id)?;
    socket.bind(&SocketAddrV6::new(group, port, 0, scope_id).into())?;

    UdpSocket::from_std(socket.into())
}

fn bind_data_socket(link_local: Ipv6Addr, port: u16, scope_id: u32) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV6::new(link_local, port, 0, scope_id).into())?;

    UdpSocket::from_std(socket.into())
}

/// Finds a link-local (fe80::/10) address via /proc/net/if_inet6, skipping
/// loopback and honoring an interface-name filter. Hosts on other systems
/// pass `link_local_override` instead.
fn find_link_local(interface_name: Option<&str>) -> Option<(Ipv6Addr, u32)> {
    let table = std::fs::read_to_string("/proc/net/if_inet6").ok()?;

    for line in table.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            continue;
        }

        let (addr_hex, ifindex_hex, name) = (fields[0], fields[1], fields[5]);
        if name == "lo" {
            continue;
        }
        if let Some(wanted) = interface_name {
            if wanted != name {
                continue;
            }
        }

        let mut octets = [0u8; 16];
        if addr_hex.len() != 32 || hex::decode_to_slice(addr_hex, &mut octets).is_err() {
            continue;
        }

        let address = Ipv6Addr::from(octets);
        if octets[0] == 0xfe && (octets[1] & 0xc0) == 0x80 {
            let scope_id = u32::from_str_radix(ifindex_hex, 16).ok()?;
            log::info!("auto: using link-local {} on {}", address, name);
            return Some((address, scope_id));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AutoInterfaceConfig {
        AutoInterfaceConfig {
            group_id: "demo".into(),
            announce_interval: Duration::from_secs(2),
            peer_timeout: Duration::from_secs(10),
            ..Default::default()
        }
    }

    #[test]
    fn multicast_group_uses_leading_hash_bytes() {
        let group = multicast_group("demo");
        let octets = group.octets();
        let group_hash = full_hash(b"demo");

        assert_eq!(octets[0], 0xff);
        assert_eq!(octets[1], 0x12);
        assert_eq!(&octets[2..4], &[0, 0]);
        assert_eq!(&octets[4..16], &group_hash.as_slice()[..12]);
    }

    #[test]
    fn discovery_token_binds_group_and_address() {
        let a = discovery_token("demo", "fe80::aaaa");
        let b = discovery_token("demo", "fe80::bbbb");
        let c = discovery_token("other", "fe80::aaaa");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn valid_discovery_adds_and_refreshes_peer() {
        let own: Ipv6Addr = "fe80::aaaa".parse().expect("address");
        let peer: Ipv6Addr = "fe80::bbbb".parse().expect("address");
        let mut state = AutoInterfaceState::new(&config(), own);

        let token = discovery_token("demo", &peer.to_string());
        let start = Instant::now();

        assert!(state.handle_discovery(peer, token.as_slice(), start));
        assert_eq!(state.peers().len(), 1);

        let later = start + Duration::from_secs(5);
        assert!(state.handle_discovery(peer, token.as_slice(), later));
        assert_eq!(state.peers().len(), 1);
        assert_eq!(state.peers()[0].last_heard, later);
    }

    #[test]
    fn mismatched_token_is_rejected() {
        let own: Ipv6Addr = "fe80::aaaa".parse().expect("address");
        let peer: Ipv6Addr = "fe80::bbbb".parse().expect("address");
        let mut state = AutoInterfaceState::new(&config(), own);

        let wrong = discovery_token("demo", "fe80::cccc");
        assert!(!state.handle_discovery(peer, wrong.as_slice(), Instant::now()));
        assert!(state.peers().is_empty());
    }

    #[test]
    fn own_echo_is_tracked_but_never_a_unicast_target() {
        let own: Ipv6Addr = "fe80::aaaa".parse().expect("address");
        let peer: Ipv6Addr = "fe80::bbbb".parse().expect("address");
        let mut state = AutoInterfaceState::new(&config(), own);
        let now = Instant::now();

        let own_token = discovery_token("demo", &own.to_string());
        let peer_token = discovery_token("demo", &peer.to_string());
        assert!(state.handle_discovery(own, own_token.as_slice(), now));
        assert!(state.handle_discovery(peer, peer_token.as_slice(), now));

        let targets = state.unicast_targets(3);
        assert_eq!(targets.len(), 1);
        assert_eq!(*targets[0].ip(), peer);
        assert_eq!(targets[0].scope_id(), 3);
    }

    #[test]
    fn stale_peers_are_evicted() {
        let own: Ipv6Addr = "fe80::aaaa".parse().expect("address");
        let peer: Ipv6Addr = "fe80::bbbb".parse().expect("address");
        let mut state = AutoInterfaceState::new(&config(), own);
        let start = Instant::now();

        let token = discovery_token("demo", &peer.to_string());
        state.handle_discovery(peer, token.as_slice(), start);

        state.sweep(start + Duration::from_secs(5));
        assert_eq!(state.peers().len(), 1);

        state.sweep(start + Duration::from_secs(11));
        assert!(state.peers().is_empty());
    }

    #[test]
    fn data_plane_suppresses_duplicates() {
        let own: Ipv6Addr = "fe80::aaaa".parse().expect("address");
        let mut state = AutoInterfaceState::new(&config(), own);
        let now = Instant::now();

        assert!(state.handle_data(b"datagram", now));
        assert!(!state.handle_data(b"datagram", now));
        assert!(state.handle_data(b"another", now));
    }

    #[test]
    fn announce_respects_interval() {
        let own: Ipv6Addr = "fe80::aaaa".parse().expect("address");
        let mut state = AutoInterfaceState::new(&config(), own);
        let start = Instant::now();

        assert!(state.announce_due(start).is_some());
        assert!(state.announce_due(start + Duration::from_secs(1)).is_none());
        let token = state.announce_due(start + Duration::from_secs(2)).expect("due again");
        assert_eq!(&token, state.token().as_bytes());
    }
}

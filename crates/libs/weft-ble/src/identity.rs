use core::fmt;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use weft_core::hash::{AddressHash, ADDRESS_SIZE};

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Fired with `(mac, peer_identity, is_central)` when a handshake lands.
pub type HandshakeCompleteCallback = Box<dyn FnMut(MacAddress, AddressHash, bool) + Send>;

/// Fired with `(mac, reason)` when a handshake is abandoned.
pub type HandshakeFailedCallback = Box<dyn FnMut(MacAddress, &str) + Send>;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let mut mac = [0u8; 6];
        if bytes.len() != 6 {
            return None;
        }
        mac.copy_from_slice(bytes);
        Some(Self(mac))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum HandshakeState {
    None,
    Initiated,
    ReceivedIdentity,
    Complete,
}

struct HandshakeSession {
    state: HandshakeState,
    is_central: bool,
    started_at: Instant,
}

/// Runs the first-message identity exchange and keeps the bidirectional
/// `mac <-> identity` maps that survive MAC rotation.
///
/// The central writes its 16-byte identity as the first payload after a
/// connection; the peripheral detects the handshake as an inbound payload
/// of exactly 16 bytes from a MAC with no mapped identity.
pub struct IdentityManager {
    local_identity: AddressHash,
    mac_to_identity: HashMap<MacAddress, AddressHash>,
    identity_to_mac: HashMap<AddressHash, MacAddress>,
    sessions: HashMap<MacAddress, HandshakeSession>,
    timeout: Duration,
    complete_callback: Option<HandshakeCompleteCallback>,
    failed_callback: Option<HandshakeFailedCallback>,
}

impl IdentityManager {
    pub fn new(local_identity: AddressHash) -> Self {
        Self {
            local_identity,
            mac_to_identity: HashMap::new(),
            identity_to_mac: HashMap::new(),
            sessions: HashMap::new(),
            timeout: HANDSHAKE_TIMEOUT,
            complete_callback: None,
            failed_callback: None,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_complete_callback(&mut self, callback: HandshakeCompleteCallback) {
        self.complete_callback = Some(callback);
    }

    pub fn set_failed_callback(&mut self, callback: HandshakeFailedCallback) {
        self.failed_callback = Some(callback);
    }

    pub fn local_identity(&self) -> &AddressHash {
        &self.local_identity
    }

    /// Starts a handshake as the central. Returns the identity bytes to
    /// write as the first message on the new connection.
    pub fn initiate_handshake(&mut self, mac: MacAddress, now: Instant) -> [u8; ADDRESS_SIZE] {
        self.sessions.insert(
            mac,
            HandshakeSession { state: HandshakeState::Initiated, is_central: true, started_at: now },
        );
        log::debug!("handshake: initiated with {}", mac);
        *self.local_identity.as_bytes()
    }

    /// True when `data` reads as a handshake from `mac`: exactly 16 bytes
    /// with no identity yet mapped for that MAC.
    pub fn is_handshake_data(&self, mac: &MacAddress, data: &[u8]) -> bool {
        data.len() == ADDRESS_SIZE && !self.mac_to_identity.contains_key(mac)
    }

    /// Inspects inbound data for the handshake. Returns true when the data
    /// was consumed as a handshake message; false hands it to the regular
    /// packet path.
    pub fn process_received(
        &mut self,
        mac: MacAddress,
        data: &[u8],
        is_central: bool,
        now: Instant,
    ) -> bool {
        if !self.is_handshake_data(&mac, data) {
            return false;
        }

        let Ok(peer_identity) = AddressHash::from_slice(data) else {
            return false;
        };

        let session = self.sessions.entry(mac).or_insert(HandshakeSession {
            state: HandshakeState::None,
            is_central,
            started_at: now,
        });
        session.state = HandshakeState::ReceivedIdentity;

        self.complete_handshake(mac, peer_identity, is_central);
        true
    }

    /// Installs the bidirectional mapping and marks the session COMPLETE.
    pub fn complete_handshake(
        &mut self,
        mac: MacAddress,
        peer_identity: AddressHash,
        is_central: bool,
    ) {
        if let Some(previous_mac) = self.identity_to_mac.get(&peer_identity).copied() {
            if previous_mac != mac {
                // MAC rotation: the identity keeps its standing
                log::info!(
                    "handshake: {} rotated from {} to {}",
                    peer_identity,
                    previous_mac,
                    mac
                );
                self.mac_to_identity.remove(&previous_mac);
            }
        }

        self.mac_to_identity.insert(mac, peer_identity);
        self.identity_to_mac.insert(peer_identity, mac);

        if let Some(session) = self.sessions.get_mut(&mac) {
            session.state = HandshakeState::Complete;
        }

        log::info!("handshake: complete with {} as {}", mac, peer_identity);

        if let Some(callback) = self.complete_callback.as_mut() {
            callback(mac, peer_identity, is_central);
        }
    }

    /// Re-points a known identity at a new MAC without a fresh handshake.
    pub fn update_mac_for_identity(&mut self, identity: AddressHash, new_mac: MacAddress) {
        if let Some(previous_mac) = self.identity_to_mac.insert(identity, new_mac) {
            if previous_mac != new_mac {
                self.mac_to_identity.remove(&previous_mac);
            }
        }
        self.mac_to_identity.insert(new_mac, identity);
        log::debug!("handshake: {} now at {}", identity, new_mac);
    }

    /// Expires stalled handshakes back to NONE and reports the failure.
    pub fn check_timeouts(&mut self, now: Instant) {
        let timeout = self.timeout;
        let stalled: Vec<MacAddress> = self
            .sessions
            .iter()
            .filter(|(_, session)| {
                session.state != HandshakeState::Complete
                    && now.duration_since(session.started_at) > timeout
            })
            .map(|(mac, _)| *mac)
            .collect();

        for mac in stalled {
            self.sessions.remove(&mac);
            log::warn!("handshake: timeout with {}", mac);
            if let Some(callback) = self.failed_callback.as_mut() {
                callback(mac, "handshake timeout");
            }
        }
    }

    pub fn identity_for_mac(&self, mac: &MacAddress) -> Option<&AddressHash> {
        self.mac_to_identity.get(mac)
    }

    pub fn mac_for_identity(&self, identity: &AddressHash) -> Option<&MacAddress> {
        self.identity_to_mac.get(identity)
    }

    pub fn has_identity(&self, mac: &MacAddress) -> bool {
        self.mac_to_identity.contains_key(mac)
    }

    pub fn handshake_in_progress(&self, mac: &MacAddress) -> bool {
        self.sessions
            .get(mac)
            .is_some_and(|session| session.state != HandshakeState::Complete)
    }

    pub fn known_peer_count(&self) -> usize {
        self.identity_to_mac.len()
    }

    /// Disconnect tears down only this MAC's mapping; the identity stays
    /// reachable through any other MAC it shows up on.
    pub fn remove_mapping(&mut self, mac: &MacAddress) {
        self.sessions.remove(mac);
        if let Some(identity) = self.mac_to_identity.remove(mac) {
            if self.identity_to_mac.get(&identity) == Some(mac) {
                self.identity_to_mac.remove(&identity);
            }
            log::debug!("handshake: unmapped {} from {}", mac, identity);
        }
    }

    pub fn clear_all(&mut self) {
        self.sessions.clear();
        self.mac_to_identity.clear();
        self.identity_to_mac.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::hash::truncated_hash;

    fn mac(value: u8) -> MacAddress {
        MacAddress([value; 6])
    }

    #[test]
    fn sixteen_byte_first_message_is_a_handshake() {
        let mut manager = IdentityManager::new(truncated_hash(b"local"));
        let peer = truncated_hash(b"peer");
        let now = Instant::now();

        assert!(manager.process_received(mac(1), peer.as_slice(), false, now));
        assert_eq!(manager.identity_for_mac(&mac(1)), Some(&peer));
        assert_eq!(manager.mac_for_identity(&peer), Some(&mac(1)));

        // Same bytes again: identity already mapped, regular data now
        assert!(!manager.process_received(mac(1), peer.as_slice(), false, now));
    }

    #[test]
    fn wrong_length_is_regular_data() {
        let mut manager = IdentityManager::new(truncated_hash(b"local"));
        assert!(!manager.process_received(mac(1), &[0u8; 15], false, Instant::now()));
        assert!(!manager.process_received(mac(1), &[0u8; 17], false, Instant::now()));
        assert_eq!(manager.known_peer_count(), 0);
    }

    #[test]
    fn initiate_returns_local_identity_bytes() {
        let local = truncated_hash(b"local");
        let mut manager = IdentityManager::new(local);

        let written = manager.initiate_handshake(mac(1), Instant::now());
        assert_eq!(&written, local.as_bytes());
        assert!(manager.handshake_in_progress(&mac(1)));
    }

    #[test]
    fn mac_rotation_keeps_identity_binding() {
        let mut manager = IdentityManager::new(truncated_hash(b"local"));
        let peer = truncated_hash(b"peer");
        let now = Instant::now();

        manager.process_received(mac(1), peer.as_slice(), false, now);

        // Same identity appears on a new MAC: mapping moves, no handshake
        manager.update_mac_for_identity(peer, mac(2));

        assert_eq!(manager.mac_for_identity(&peer), Some(&mac(2)));
        assert_eq!(manager.identity_for_mac(&mac(2)), Some(&peer));
        assert!(manager.identity_for_mac(&mac(1)).is_none());
        assert_eq!(manager.known_peer_count(), 1);
    }

    #[test]
    fn rotated_mac_handshake_replaces_old_mapping() {
        let mut manager = IdentityManager::new(truncated_hash(b"local"));
        let peer = truncated_hash(b"peer");
        let now = Instant::now();

        manager.process_received(mac(1), peer.as_slice(), false, now);
        manager.process_received(mac(2), peer.as_slice(), false, now);

        assert_eq!(manager.mac_for_identity(&peer), Some(&mac(2)));
        assert!(manager.identity_for_mac(&mac(1)).is_none());
    }

    #[test]
    fn disconnect_removes_only_that_mac() {
        let mut manager = IdentityManager::new(truncated_hash(b"local"));
        let alpha = truncated_hash(b"alpha");
        let beta = truncated_hash(b"beta");
        let now = Instant::now();

        manager.process_received(mac(1), alpha.as_slice(), false, now);
        manager.process_received(mac(2), beta.as_slice(), false, now);

        manager.remove_mapping(&mac(1));

        assert!(manager.identity_for_mac(&mac(1)).is_none());
        assert!(manager.mac_for_identity(&alpha).is_none());
        assert_eq!(manager.identity_for_mac(&mac(2)), Some(&beta));
    }

    #[test]
    fn stalled_handshake_times_out_and_reports() {
        use std::sync::{Arc, Mutex};

        let mut manager = IdentityManager::new(truncated_hash(b"local"));
        manager.set_timeout(Duration::from_secs(10));

        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        manager.set_failed_callback(Box::new(move |mac, reason| {
            sink.lock().expect("lock").push((mac, reason.to_string()));
        }));

        let start = Instant::now();
        manager.initiate_handshake(mac(1), start);

        manager.check_timeouts(start + Duration::from_secs(9));
        assert!(manager.handshake_in_progress(&mac(1)));

        manager.check_timeouts(start + Duration::from_secs(11));
        assert!(!manager.handshake_in_progress(&mac(1)));
        assert_eq!(failures.lock().expect("lock").len(), 1);
    }

    #[test]
    fn completed_sessions_do_not_time_out() {
        let mut manager = IdentityManager::new(truncated_hash(b"local"));
        manager.set_timeout(Duration::from_secs(10));
        let peer = truncated_hash(b"peer");
        let start = Instant::now();

        manager.initiate_handshake(mac(1), start);
        manager.process_received(mac(1), peer.as_slice(), true, start);

        manager.check_timeouts(start + Duration::from_secs(60));
        assert_eq!(manager.identity_for_mac(&mac(1)), Some(&peer));
    }

    #[test]
    fn complete_callback_reports_role() {
        use std::sync::{Arc, Mutex};

        let mut manager = IdentityManager::new(truncated_hash(b"local"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        manager.set_complete_callback(Box::new(move |mac, identity, is_central| {
            sink.lock().expect("lock").push((mac, identity, is_central));
        }));

        let peer = truncated_hash(b"peer");
        manager.process_received(mac(1), peer.as_slice(), true, Instant::now());

        let calls = seen.lock().expect("lock");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (mac(1), peer, true));
    }
}

pub mod announce_limits;
pub mod announce_table;
mod handler;
mod jobs;
pub mod path_table;
pub mod retransmit;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use weft_core::destination::{DestinationName, InDestination, Kind};
use weft_core::hash::AddressHash;
use weft_core::identity::PrivateIdentity;
use weft_core::packet::Packet;

use crate::iface::{InterfaceChannel, InterfaceManager};

use announce_limits::{AnnounceLimits, AnnounceRateLimit};
use announce_table::AnnounceTable;
use handler::TransportHandler;
use path_table::PathTable;
use retransmit::RetransmitQueue;

pub const PROBE_APP: &str = "weft";
pub const PROBE_ASPECT: &str = "probe";

const EVENT_CHANNEL_CAPACITY: usize = 64;
const RX_CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub name: String,
    /// Reforward transit packets and stamp rebroadcast announces with our
    /// own address as the transport id.
    pub transport_enabled: bool,
    /// Answer probe packets on the well-known probe destination.
    pub probe_enabled: bool,
    pub path_expiry: Duration,
    pub dedup_capacity: usize,
    pub dedup_ttl: Duration,
    pub announce_cache_capacity: usize,
    pub announce_rate_limit: AnnounceRateLimit,
    pub retransmit_backoff: Duration,
    pub retransmit_backoff_cap: Duration,
    pub retransmit_budget: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            name: "weft".into(),
            transport_enabled: false,
            probe_enabled: false,
            path_expiry: Duration::from_secs(86_400),
            dedup_capacity: 64,
            dedup_ttl: Duration::from_secs(2),
            announce_cache_capacity: 256,
            announce_rate_limit: AnnounceRateLimit::default(),
            retransmit_backoff: Duration::from_secs(1),
            retransmit_backoff_cap: Duration::from_secs(30),
            retransmit_budget: 5,
        }
    }
}

/// Drop counters kept by the transport core.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransportStats {
    pub duplicates_dropped: u64,
    pub malformed_frames: u64,
    pub invalid_announces: u64,
    pub forwarded_packets: u64,
}

/// Validated announce, delivered after the path table was updated.
#[derive(Debug, Clone)]
pub struct AnnounceEvent {
    pub destination: AddressHash,
    pub identity_address: AddressHash,
    pub app_data: Vec<u8>,
    pub hops: u8,
    pub iface: AddressHash,
    pub packet: Packet,
}

/// Data packet that matched a registered local destination.
#[derive(Debug, Clone)]
pub struct DeliveryEvent {
    pub destination: AddressHash,
    pub packet: Packet,
}

/// Outgoing packet abandoned after the retransmission budget ran out.
#[derive(Debug, Clone)]
pub struct RetransmitDrop {
    pub iface: AddressHash,
    pub raw: Vec<u8>,
    pub attempts: u8,
}

/// The transport core: announce propagation, path maintenance, per-hop
/// forwarding, retransmission, and dispatch to local destinations.
///
/// All table state lives behind one handler lock touched only by the rx
/// loop, the periodic sweep, and the public API, so callbacks re-entering
/// the API observe consistent tables.
pub struct Transport {
    name: String,
    handler: Arc<Mutex<TransportHandler>>,
    announce_tx: broadcast::Sender<AnnounceEvent>,
    delivery_tx: broadcast::Sender<DeliveryEvent>,
    drop_tx: broadcast::Sender<RetransmitDrop>,
    cancel: CancellationToken,
}

impl Transport {
    pub fn new(config: TransportConfig, identity: PrivateIdentity) -> Self {
        let (announce_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (delivery_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (drop_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let (iface_manager, rx_recv) = InterfaceManager::new(RX_CHANNEL_CAPACITY);

        let name = config.name.clone();
        let cancel = CancellationToken::new();

        let mut handler = TransportHandler {
            path_table: PathTable::new(config.path_expiry),
            announce_table: AnnounceTable::new(config.announce_cache_capacity),
            announce_limits: AnnounceLimits::new(config.announce_rate_limit.clone()),
            dedup: crate::iface::DedupDeque::new(config.dedup_capacity, config.dedup_ttl),
            retransmit: RetransmitQueue::new(
                config.retransmit_backoff,
                config.retransmit_backoff_cap,
                config.retransmit_budget,
            ),
            config,
            identity: identity.clone(),
            iface_manager,
            destinations: std::collections::HashMap::new(),
            remote_identities: std::collections::HashMap::new(),
            announce_tx: announce_tx.clone(),
            delivery_tx: delivery_tx.clone(),
            drop_tx: drop_tx.clone(),
            probe_destination: None,
            stats: TransportStats::default(),
        };

        if handler.config.probe_enabled {
            let probe = InDestination::new(
                DestinationName::new(PROBE_APP, PROBE_ASPECT),
                Kind::Single,
                identity,
            );
            let probe_hash = *probe.hash();
            handler.destinations.insert(probe_hash, Arc::new(probe));
            handler.probe_destination = Some(probe_hash);
            log::info!("tp({}): probe destination {}", name, probe_hash);
        }

        let handler = Arc::new(Mutex::new(handler));

        tokio::spawn(jobs::run(handler.clone(), rx_recv, cancel.clone()));

        Self { name, handler, announce_tx, delivery_tx, drop_tx, cancel }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers an interface; the returned channel bundle is handed to
    /// the interface worker.
    pub async fn attach_interface(&self) -> InterfaceChannel {
        self.handler.lock().await.iface_manager.attach()
    }

    /// Registers a local destination; matching data packets surface as
    /// [`DeliveryEvent`]s.
    pub async fn register_destination(&self, destination: InDestination) -> AddressHash {
        let hash = *destination.hash();
        self.handler.lock().await.destinations.insert(hash, Arc::new(destination));
        log::debug!("tp({}): registered destination {}", self.name, hash);
        hash
    }

    /// Announces a registered destination on every interface.
    pub async fn announce(&self, destination: &AddressHash, app_data: Option<&[u8]>) {
        let mut handler = self.handler.lock().await;

        let Some(dest) = handler.destinations.get(destination).cloned() else {
            log::warn!("tp({}): announce for unknown destination {}", self.name, destination);
            return;
        };

        let packet = dest.announce_packet(app_data);
        handler.send_outbound(&packet, Instant::now());
    }

    /// Routes an outbound packet: direct over a known path, broadcast
    /// otherwise.
    pub async fn send_packet(&self, packet: Packet) {
        self.handler.lock().await.send_outbound(&packet, Instant::now());
    }

    pub fn announces(&self) -> broadcast::Receiver<AnnounceEvent> {
        self.announce_tx.subscribe()
    }

    pub fn deliveries(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.delivery_tx.subscribe()
    }

    pub fn retransmit_drops(&self) -> broadcast::Receiver<RetransmitDrop> {
        self.drop_tx.subscribe()
    }

    pub async fn hops_to(&self, destination: &AddressHash) -> Option<u8> {
        self.handler.lock().await.path_table.hops_to(destination)
    }

    pub async fn stats(&self) -> TransportStats {
        self.handler.lock().await.stats
    }

    /// Identity learned from a validated announce, if any.
    pub async fn identity_for(
        &self,
        address: &AddressHash,
    ) -> Option<weft_core::identity::Identity> {
        self.handler.lock().await.identity_for(address).copied()
    }

    pub async fn has_path(&self, destination: &AddressHash) -> bool {
        self.handler.lock().await.path_table.get(destination).is_some()
    }

    /// Feeds one raw inbound frame through dedup and dispatch, exactly as
    /// the rx loop does. Used by hosts that poll their own media and by
    /// the test suites.
    pub async fn process_raw(&self, iface: AddressHash, raw: &[u8]) {
        self.handler.lock().await.handle_inbound(iface, raw, Instant::now());
    }

    /// Runs the periodic sweep immediately.
    pub async fn sweep_now(&self) {
        self.handler.lock().await.sweep(Instant::now());
    }

    /// Cancels the rx loop and sweeps; interface workers stop with it.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

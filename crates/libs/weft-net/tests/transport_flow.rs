use std::time::Duration;

use rand_core::OsRng;

use weft_core::destination::{DestinationName, InDestination, Kind};
use weft_core::identity::PrivateIdentity;
use weft_core::packet::{HeaderKind, Packet, PacketType};
use weft_net::transport::{Transport, TransportConfig};

fn transport(enabled: bool, probe: bool) -> Transport {
    let config = TransportConfig {
        name: "test".into(),
        transport_enabled: enabled,
        probe_enabled: probe,
        dedup_ttl: Duration::from_secs(30),
        ..Default::default()
    };
    Transport::new(config, PrivateIdentity::generate(OsRng))
}

fn remote_destination() -> InDestination {
    InDestination::new(
        DestinationName::new("messenger", "delivery"),
        Kind::Single,
        PrivateIdentity::generate(OsRng),
    )
}

fn announce_raw(destination: &InDestination, hops: u8, app_data: &[u8]) -> Vec<u8> {
    let mut packet = destination.announce_packet(Some(app_data));
    packet.header.hops = hops;
    packet.encode().expect("encodable announce")
}

#[tokio::test(flavor = "current_thread")]
async fn announce_replacement_follows_hop_and_freshness_rules() {
    let transport = transport(true, false);
    let ingress = transport.attach_interface().await;
    let mut other = transport.attach_interface().await;

    let destination = remote_destination();
    let dest_hash = *destination.hash();

    // First announce at 3 hops installs the path at 4
    transport.process_raw(ingress.address, &announce_raw(&destination, 3, b"a")).await;
    assert_eq!(transport.hops_to(&dest_hash).await, Some(4));

    // Rebroadcast goes out every interface except the ingress
    let rebroadcast = other.tx.try_recv().expect("rebroadcast on other iface");
    let decoded = Packet::decode(&rebroadcast.raw).expect("decodable");
    assert_eq!(decoded.header.packet_type, PacketType::Announce);
    assert_eq!(decoded.header.hops, 4);
    assert_eq!(decoded.header.kind, HeaderKind::Transport);

    // More hops: ignored, nothing rebroadcast
    transport.process_raw(ingress.address, &announce_raw(&destination, 5, b"b")).await;
    assert_eq!(transport.hops_to(&dest_hash).await, Some(4));
    assert!(other.tx.try_recv().is_err());

    // Fewer hops: replaces
    transport.process_raw(ingress.address, &announce_raw(&destination, 1, b"c")).await;
    assert_eq!(transport.hops_to(&dest_hash).await, Some(2));
    assert!(other.tx.try_recv().is_ok());

    // Equal hops, fresher observation: replaces again
    transport.process_raw(ingress.address, &announce_raw(&destination, 1, b"d")).await;
    assert_eq!(transport.hops_to(&dest_hash).await, Some(2));
    assert!(other.tx.try_recv().is_ok());

    transport.stop();
}

#[tokio::test(flavor = "current_thread")]
async fn same_packet_on_two_interfaces_delivers_once() {
    let transport = transport(false, false);
    let first = transport.attach_interface().await;
    let second = transport.attach_interface().await;

    let local = InDestination::new(
        DestinationName::new("messenger", "delivery"),
        Kind::Single,
        PrivateIdentity::generate(OsRng),
    );
    let dest_hash = transport.register_destination(local).await;

    let mut deliveries = transport.deliveries();

    let packet = Packet {
        destination: dest_hash,
        data: weft_core::bytes::Bytes::from_slice(&[0xAB; 200]),
        ..Default::default()
    };
    let raw = packet.encode().expect("encodable");

    transport.process_raw(first.address, &raw).await;
    transport.process_raw(second.address, &raw).await;

    let event = deliveries.try_recv().expect("one delivery");
    assert_eq!(event.destination, dest_hash);
    assert!(deliveries.try_recv().is_err());
    assert_eq!(transport.stats().await.duplicates_dropped, 1);

    transport.stop();
}

#[tokio::test(flavor = "current_thread")]
async fn malformed_frames_are_counted_and_dropped() {
    let transport = transport(false, false);
    let ingress = transport.attach_interface().await;

    transport.process_raw(ingress.address, &[0x00, 0x01, 0x02]).await;
    transport.process_raw(ingress.address, &[0xFF; 10]).await;

    let stats = transport.stats().await;
    assert_eq!(stats.malformed_frames, 2);

    transport.stop();
}

#[tokio::test(flavor = "current_thread")]
async fn transit_data_is_forwarded_with_incremented_hops() {
    let transport = transport(true, false);
    let mut path_iface = transport.attach_interface().await;
    let entry_iface = transport.attach_interface().await;

    let destination = remote_destination();
    let dest_hash = *destination.hash();

    // Multi-hop path through path_iface (announce hops 2 -> entry hops 3)
    transport.process_raw(path_iface.address, &announce_raw(&destination, 2, b"a")).await;
    assert_eq!(transport.hops_to(&dest_hash).await, Some(3));

    let packet = Packet {
        destination: dest_hash,
        data: weft_core::bytes::Bytes::from_slice(b"transit payload"),
        ..Default::default()
    };
    transport.process_raw(entry_iface.address, &packet.encode().expect("encodable")).await;

    let forwarded = path_iface.tx.try_recv().expect("forwarded out the path iface");
    let decoded = Packet::decode(&forwarded.raw).expect("decodable");
    assert_eq!(decoded.header.hops, 1);
    assert_eq!(decoded.header.kind, HeaderKind::Transport);
    assert!(decoded.transport_id.is_some());
    assert_eq!(decoded.data.as_slice(), b"transit payload");

    transport.stop();
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_destination_is_dropped_silently() {
    let transport = transport(true, false);
    let ingress = transport.attach_interface().await;
    let mut other = transport.attach_interface().await;

    let packet = Packet {
        destination: weft_core::hash::truncated_hash(b"nowhere"),
        data: weft_core::bytes::Bytes::from_slice(b"lost"),
        ..Default::default()
    };
    transport.process_raw(ingress.address, &packet.encode().expect("encodable")).await;

    assert!(other.tx.try_recv().is_err());
    transport.stop();
}

#[tokio::test(flavor = "current_thread")]
async fn forwarding_requires_transport_mode() {
    let transport = transport(false, false);
    let mut path_iface = transport.attach_interface().await;
    let entry_iface = transport.attach_interface().await;

    let destination = remote_destination();
    let dest_hash = *destination.hash();
    transport.process_raw(path_iface.address, &announce_raw(&destination, 0, b"a")).await;
    assert_eq!(transport.hops_to(&dest_hash).await, Some(1));
    // Drain the path announce rebroadcast if any reached this interface
    while path_iface.tx.try_recv().is_ok() {}

    let packet = Packet {
        destination: dest_hash,
        data: weft_core::bytes::Bytes::from_slice(b"payload"),
        ..Default::default()
    };
    transport.process_raw(entry_iface.address, &packet.encode().expect("encodable")).await;

    assert!(path_iface.tx.try_recv().is_err());
    transport.stop();
}

#[tokio::test(flavor = "current_thread")]
async fn probe_destination_answers_with_signed_proof() {
    let identity = PrivateIdentity::generate(OsRng);
    let config = TransportConfig {
        name: "probe-node".into(),
        probe_enabled: true,
        ..Default::default()
    };
    let transport = Transport::new(config, identity.clone());
    let mut ingress = transport.attach_interface().await;

    let probe_hash = weft_core::destination::destination_hash(
        &DestinationName::new(weft_net::transport::PROBE_APP, weft_net::transport::PROBE_ASPECT),
        identity.hash(),
    );

    let probe = Packet {
        destination: probe_hash,
        data: weft_core::bytes::Bytes::from_slice(b"ping"),
        ..Default::default()
    };
    let expected_hash = probe.packet_hash();
    transport.process_raw(ingress.address, &probe.encode().expect("encodable")).await;

    let reply = ingress.tx.try_recv().expect("proof reply on the ingress iface");
    let decoded = Packet::decode(&reply.raw).expect("decodable");
    assert_eq!(decoded.header.packet_type, PacketType::Proof);
    assert_eq!(&decoded.data.as_slice()[..32], expected_hash.as_slice());

    let signature = ed25519_signature(&decoded.data.as_slice()[32..]);
    assert!(identity.identity().verify(expected_hash.as_slice(), &signature).is_ok());

    transport.stop();
}

fn ed25519_signature(bytes: &[u8]) -> ed25519_dalek::Signature {
    ed25519_dalek::Signature::from_slice(bytes).expect("signature bytes")
}

#[tokio::test(flavor = "current_thread")]
async fn failed_sends_retry_until_the_budget_drops_them() {
    let config = TransportConfig {
        name: "retry".into(),
        retransmit_backoff: Duration::ZERO,
        retransmit_backoff_cap: Duration::ZERO,
        retransmit_budget: 2,
        ..Default::default()
    };
    let transport = Transport::new(config, PrivateIdentity::generate(OsRng));
    let stalled = transport.attach_interface().await;
    let mut drops = transport.retransmit_drops();

    // A worker that never drains its queue: fill it, then overflow
    let packet = Packet {
        destination: weft_core::hash::truncated_hash(b"somewhere"),
        data: weft_core::bytes::Bytes::from_slice(b"payload"),
        ..Default::default()
    };
    for _ in 0..129 {
        transport.send_packet(packet.clone()).await;
    }

    // First sweep retries against the still-full queue, second one
    // exhausts the two-attempt budget
    transport.sweep_now().await;
    transport.sweep_now().await;

    let dropped = drops.try_recv().expect("drop event");
    assert_eq!(dropped.iface, stalled.address);
    assert_eq!(dropped.attempts, 2);

    transport.stop();
}

#[tokio::test(flavor = "current_thread")]
async fn own_announce_echo_is_ignored() {
    let identity = PrivateIdentity::generate(OsRng);
    let transport = Transport::new(
        TransportConfig { transport_enabled: true, ..Default::default() },
        identity.clone(),
    );
    let ingress = transport.attach_interface().await;

    let local = InDestination::new(
        DestinationName::new("messenger", "delivery"),
        Kind::Single,
        identity,
    );
    let echo = local.announce_packet(None).encode().expect("encodable");
    let dest_hash = transport.register_destination(local).await;

    let mut announces = transport.announces();

    // A copy of our own announce arriving from the network must not
    // install a path to ourselves or surface as an event.
    transport.process_raw(ingress.address, &echo).await;

    assert_eq!(transport.hops_to(&dest_hash).await, None);
    assert!(announces.try_recv().is_err());

    transport.stop();
}

//! Two stacks on the in-memory network

use bytes::Bytes;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use vip_core::csp::{CallType, Message, ReleaseCause, ReleaseMessage, StartMessage};
use vip_core::CallState;
use vip_crp::ResolveStatus;
use vip_ctp::{CloseCause, ConnectionState, TransportEvent};
use vip_stack::{Stack, StackConfig, StackEvent};
use vip_test_utils::{
    addr, crp_tick, events, incoming, pump, stack_with_identity, tick, TestStack,
};
use vip_transport::MemoryNetwork;

fn a_and_b(net: &MemoryNetwork) -> ((TestStack, vip_crp::IdentityId), (TestStack, vip_crp::IdentityId)) {
    (
        stack_with_identity(net, [10, 0, 0, 1], "00000123"),
        stack_with_identity(net, [10, 0, 0, 2], "00000456:1"),
    )
}

#[test]
fn test_call_from_start_to_release() {
    let net = MemoryNetwork::new();
    let ((mut a, _), (mut b, b_id)) = a_and_b(&net);

    // B resolves A and places the call
    let cid = b.connect(b_id, addr("00000123")).unwrap();
    assert_eq!(b.state(cid), Some(ConnectionState::Connecting));
    let start = StartMessage::new(addr("00000456:1"), addr("00000123"), CallType::Normal, 1);
    b.send_csp(cid, &Message::Start(start)).unwrap();
    assert_eq!(b.call_state(cid), Some(CallState::Started));
    pump(&mut [&mut a, &mut b]);

    assert_eq!(
        b.is_resolved(&addr("00000123")),
        ResolveStatus::Resolved(SocketAddr::from(([10, 0, 0, 1], 24101)))
    );
    assert_eq!(b.state(cid), Some(ConnectionState::Open));

    // A reads exactly that record
    let accepted = incoming(&mut a).expect("no incoming connection");
    match a.read_csp(accepted).unwrap() {
        Some(Message::Start(received)) => {
            assert_eq!(received.from, addr("00000456:1"));
            assert_eq!(received.to, addr("00000123"));
            assert_eq!(received.call_type, CallType::Normal);
            assert_eq!(received.call_id, 1);
        }
        other => panic!("expected START, got {:?}", other),
    }
    assert_eq!(a.read_csp(accepted).unwrap(), None);
    assert_eq!(a.call_state(accepted), Some(CallState::Started));

    a.send_csp(accepted, &Message::Connect).unwrap();
    assert_eq!(a.call_state(accepted), Some(CallState::Connected));
    pump(&mut [&mut a, &mut b]);
    assert_eq!(b.read_csp(cid).unwrap(), Some(Message::Connect));
    assert_eq!(b.call_state(cid), Some(CallState::Connected));

    // B hangs up
    let release = Message::Release(ReleaseMessage::new(ReleaseCause::Normal));
    b.send_csp(cid, &release).unwrap();
    b.close(cid).unwrap();
    pump(&mut [&mut a, &mut b]);
    tick(&mut [&mut a, &mut b], 1);

    assert_eq!(b.state(cid), Some(ConnectionState::Closed));
    assert_eq!(a.state(accepted), Some(ConnectionState::Closed));
    assert_eq!(a.read_csp(accepted).unwrap(), Some(release));
    assert_eq!(a.call_state(accepted), Some(CallState::Closed));
    assert_eq!(b.call_state(cid), Some(CallState::Closed));
    assert!(a.read_csp(accepted).is_err());
}

#[test]
fn test_local_resolution_stays_off_the_wire() {
    let net = MemoryNetwork::new();
    let (mut a, _) = stack_with_identity(&net, [10, 0, 0, 1], "00000123");
    let resolution = a.resolve(&addr("123")).unwrap();
    assert_eq!(
        resolution,
        vip_crp::Resolution::Resolved(SocketAddr::from(([10, 0, 0, 1], 24101)))
    );
    assert_eq!(net.stats().sent, 0);
}

#[test]
fn test_malformed_records_are_skipped() {
    let net = MemoryNetwork::new();
    let ((mut a, _), (mut b, b_id)) = a_and_b(&net);

    let cid = b
        .connect_to_ip(b_id, addr("123"), SocketAddr::from(([10, 0, 0, 1], 24101)))
        .unwrap();
    // Unknown type, then a START cut short
    b.write(cid, Bytes::from_static(&[0x00, 0x99, 1, 2, 3])).unwrap();
    b.write(cid, Bytes::from_static(&[0x00, 0x01, 0, 0])).unwrap();
    b.send_csp(cid, &Message::Connect).unwrap();
    pump(&mut [&mut a, &mut b]);

    let accepted = incoming(&mut a).unwrap();
    assert_eq!(a.read_csp(accepted).unwrap(), Some(Message::Connect));
    assert_eq!(a.read_csp(accepted).unwrap(), None);
}

#[test]
fn test_removing_identity_resets_its_connections() {
    let net = MemoryNetwork::new();
    let ((mut a, a_id), (mut b, b_id)) = a_and_b(&net);

    let cid = b.connect(b_id, addr("123")).unwrap();
    b.write(cid, &b"hello"[..]).unwrap();
    pump(&mut [&mut a, &mut b]);
    let accepted = incoming(&mut a).unwrap();

    assert_eq!(a.remove_identity(a_id).unwrap(), vec![accepted]);
    assert_eq!(a.ports().count(), 0);
    assert_eq!(a.state(accepted), None);
    pump(&mut [&mut a, &mut b]);

    assert!(events(&mut b).contains(&StackEvent::Transport(TransportEvent::Closed {
        cid,
        cause: CloseCause::Reset,
    })));
    assert!(b.write(cid, &b"anyone?"[..]).is_err());
}

#[test]
fn test_unresolvable_peer() {
    let net = MemoryNetwork::new();
    let (mut b, b_id) = stack_with_identity(&net, [10, 0, 0, 2], "00000456:1");

    let cid = b.connect(b_id, addr("999")).unwrap();
    crp_tick(&mut [&mut b], 40);

    let info = b.info(cid).unwrap();
    assert_eq!(info.state, ConnectionState::Closed);
    assert_eq!(info.close_cause, Some(CloseCause::Unresolved));
    assert!(b.read(cid).is_err());
}

#[test]
fn test_broadcast_between_stacks() {
    let net = MemoryNetwork::new();
    let ((mut a, _), (mut b, b_id)) = a_and_b(&net);

    b.write_broadcast(
        b_id,
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 255)),
        24101,
        &b"door 1 open"[..],
    )
    .unwrap();
    pump(&mut [&mut a, &mut b]);

    let broadcast = a.read_broadcast().unwrap();
    assert_eq!(broadcast.source, addr("456:1"));
    assert_eq!(&broadcast.payload[..], b"door 1 open");
}

#[test]
fn test_stack_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
ctp_tick_ms = 50

[[identities]]
address = "00000123"
ip = "10.0.0.1"

[[identities]]
address = "00000124"
ip = "10.0.0.1"
port = 24102

[ctp]
max_retries = 4
"#
    )
    .unwrap();

    let config = StackConfig::load(file.path()).unwrap();
    assert_eq!(config.ctp_tick_ms, 50);
    assert_eq!(config.ctp.max_retries, 4);

    let net = MemoryNetwork::new();
    let stack = Stack::from_config(net.host(Ipv4Addr::new(10, 0, 0, 1)), config).unwrap();
    assert_eq!(stack.ports().collect::<Vec<_>>(), vec![24101, 24102]);
    assert_eq!(stack.resolver().identities().count(), 2);

    assert!(StackConfig::load("/nonexistent/vip.toml").is_err());
}

//! Two resolvers talking to each other

use std::net::{Ipv4Addr, SocketAddr};
use vip_core::LogicalAddress;
use vip_crp::{
    CrpConfig, Resolution, ResolveStatus, Resolver, ResolverEvent, TtlClass,
};

const MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
const PORT: u16 = 24101;

struct Node {
    ip: Ipv4Addr,
    resolver: Resolver,
}

fn addr(s: &str) -> LogicalAddress {
    LogicalAddress::parse(s).unwrap()
}

fn node(ip: [u8; 4], identity: &str, config: CrpConfig) -> Node {
    let ip = Ipv4Addr::from(ip);
    let mut resolver = Resolver::new(config);
    resolver
        .register_identity(addr(identity), ip, MASK, PORT)
        .unwrap();
    Node { ip, resolver }
}

/// Move every queued datagram to the nodes it is addressed to.
/// Returns the number of datagrams sent.
fn exchange(nodes: &mut [Node]) -> usize {
    let mut sent = 0;
    loop {
        let mut moved = Vec::new();
        for (i, n) in nodes.iter_mut().enumerate() {
            while let Some(tx) = n.resolver.poll_transmit() {
                moved.push((i, tx));
            }
        }
        if moved.is_empty() {
            return sent;
        }
        sent += moved.len();
        for (from_idx, tx) in moved {
            let from = SocketAddr::new(nodes[from_idx].ip.into(), tx.local_port);
            let dst_ip = match tx.destination.ip() {
                std::net::IpAddr::V4(v4) => v4,
                _ => continue,
            };
            for (i, n) in nodes.iter_mut().enumerate() {
                let hit = i != from_idx && (dst_ip == n.ip || dst_ip.octets()[3] == 255);
                if hit && tx.destination.port() == PORT {
                    n.resolver.handle_datagram(PORT, from, &tx.payload);
                }
            }
        }
    }
}

#[test]
fn test_remote_resolution_then_cache_hit() {
    let mut nodes = vec![
        node([10, 0, 0, 1], "00000123", CrpConfig::default()),
        node([10, 0, 0, 2], "00000456:1", CrpConfig::default()),
    ];

    assert_eq!(
        nodes[1].resolver.resolve(&addr("123")).unwrap(),
        Resolution::Pending
    );
    // request + reply
    assert_eq!(exchange(&mut nodes), 2);

    let expected: SocketAddr = "10.0.0.1:24101".parse().unwrap();
    assert_eq!(
        nodes[1].resolver.poll_event(),
        Some(ResolverEvent::Resolved {
            address: addr("123"),
            addr: expected
        })
    );
    for _ in 0..5 {
        assert_eq!(
            nodes[1].resolver.resolve(&addr("123")).unwrap(),
            Resolution::Resolved(expected)
        );
    }
    assert_eq!(exchange(&mut nodes), 0);
    assert_eq!(nodes[1].resolver.stats().cache_hits, 5);
}

#[test]
fn test_invalidate_triggers_fresh_request() {
    let mut nodes = vec![
        node([10, 0, 0, 1], "123", CrpConfig::default()),
        node([10, 0, 0, 2], "456:1", CrpConfig::default()),
    ];
    nodes[1].resolver.resolve(&addr("123")).unwrap();
    exchange(&mut nodes);
    assert!(matches!(
        nodes[1].resolver.is_resolved(&addr("123")),
        ResolveStatus::Resolved(_)
    ));

    assert!(nodes[1].resolver.invalidate(&addr("123")));
    assert_eq!(
        nodes[1].resolver.resolve(&addr("123")).unwrap(),
        Resolution::Pending
    );
    assert!(exchange(&mut nodes) > 0);
    assert_eq!(nodes[1].resolver.stats().requests_sent, 2);
}

#[test]
fn test_entry_expires_after_ttl() {
    let mut nodes = vec![
        node([10, 0, 0, 1], "123", CrpConfig::default()),
        node([10, 0, 0, 2], "456:1", CrpConfig::default()),
    ];
    nodes[1]
        .resolver
        .resolve_with_ttl(&addr("123"), TtlClass::Sec5)
        .unwrap();
    exchange(&mut nodes);

    nodes[1].resolver.timer(4);
    assert!(matches!(
        nodes[1].resolver.is_resolved(&addr("123")),
        ResolveStatus::Resolved(_)
    ));
    nodes[1].resolver.timer(1);
    assert_eq!(
        nodes[1].resolver.is_resolved(&addr("123")),
        ResolveStatus::Unknown
    );
}

#[test]
fn test_broadcast_sub_matches_any_identity() {
    let mut nodes = vec![
        node([10, 0, 0, 1], "123:4", CrpConfig::default()),
        node([10, 0, 0, 2], "456:1", CrpConfig::default()),
    ];
    nodes[1].resolver.resolve(&addr("123:255")).unwrap();
    exchange(&mut nodes);
    assert_eq!(
        nodes[1].resolver.is_resolved(&addr("123:255")),
        ResolveStatus::Resolved("10.0.0.1:24101".parse().unwrap())
    );
    // The exact sub-address was never asked for
    assert_eq!(
        nodes[1].resolver.is_resolved(&addr("123:4")),
        ResolveStatus::Unknown
    );
}

#[test]
fn test_failed_then_restarted() {
    let config = CrpConfig {
        max_attempts: 1,
        failed_hold_ticks: 100,
        ..Default::default()
    };
    let mut lonely = node([10, 0, 0, 2], "456:1", config);
    lonely.resolver.resolve(&addr("999")).unwrap();
    lonely.resolver.timer(1);
    assert_eq!(
        lonely.resolver.is_resolved(&addr("999")),
        ResolveStatus::Failed
    );
    while lonely.resolver.poll_transmit().is_some() {}

    assert_eq!(
        lonely.resolver.resolve(&addr("999")).unwrap(),
        Resolution::Pending
    );
    assert!(lonely.resolver.poll_transmit().is_some());
}

#[test]
fn test_config_from_toml() {
    let config: CrpConfig = toml::from_str(
        r#"
        default_ttl = "30s"
        max_attempts = 6
        "#,
    )
    .unwrap();
    assert_eq!(config.default_ttl, TtlClass::Sec30);
    assert_eq!(config.max_attempts, 6);
    assert_eq!(config.port, 24101);
}

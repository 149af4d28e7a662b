//! UDP socket tests over loopback

use std::time::{Duration, Instant};
use vip_transport::{DatagramSocket, Network, UdpConfig, UdpNetwork};

fn recv_within(socket: &impl DatagramSocket, timeout: Duration) -> Option<(Vec<u8>, std::net::SocketAddr)> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 1500];
    while Instant::now() < deadline {
        if let Some((n, from)) = socket.try_recv_from(&mut buf).unwrap() {
            return Some((buf[..n].to_vec(), from));
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    None
}

#[test]
fn test_udp_send_recv() {
    let network = UdpNetwork::new();
    let server = network.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let client = network.bind("127.0.0.1:0".parse().unwrap()).unwrap();

    client
        .send_to(b"hello", server.local_addr().unwrap())
        .unwrap();

    let (data, from) = recv_within(&server, Duration::from_secs(2)).expect("no datagram");
    assert_eq!(data, b"hello");
    assert_eq!(from, client.local_addr().unwrap());
}

#[test]
fn test_udp_config_without_broadcast() {
    let network = UdpNetwork::with_config(UdpConfig {
        broadcast: false,
        recv_buffer_size: 0,
        ..Default::default()
    });
    let socket = network.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    assert!(socket.local_addr().is_ok());
    assert!(!network.config().broadcast);
}

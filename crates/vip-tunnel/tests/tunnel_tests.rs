//! Tunnel pairs wired back to back, and a pair of runners over loopback TCP

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vip_tunnel::frame::OpenRequest;
use vip_tunnel::{
    ChannelHandler, ChannelId, ChannelState, CloseReason, Frame, FrameKind, IncomingChannel,
    LaneState, Outbox, Preference, Result, Role, RunExit, SendFlags, ServiceId, Tunnel,
    TunnelConfig, TunnelError, TunnelHandler, TunnelListener, TunnelRunner,
};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Open(u16),
    Data(u16, Vec<u8>),
    OpenFailed(u16, TunnelError),
    Closed(u16),
    Lane(LaneState),
    TunnelClosed(CloseReason),
}

type Log = Arc<Mutex<Vec<Event>>>;

struct Recorder {
    log: Log,
    echo: bool,
}

impl ChannelHandler for Recorder {
    fn on_data(&mut self, channel: ChannelId, data: Bytes, out: &mut Outbox) {
        self.log.lock().push(Event::Data(channel.raw(), data.to_vec()));
        if self.echo {
            out.send(channel, data, SendFlags::NONE);
        }
    }

    fn on_open(&mut self, channel: ChannelId, _out: &mut Outbox) {
        self.log.lock().push(Event::Open(channel.raw()));
    }

    fn on_open_failed(&mut self, channel: ChannelId, error: TunnelError) {
        self.log.lock().push(Event::OpenFailed(channel.raw(), error));
    }

    fn on_closed(&mut self, channel: ChannelId) {
        self.log.lock().push(Event::Closed(channel.raw()));
    }
}

/// Accepts channels for one service and echoes what they carry
struct EchoService {
    log: Log,
    service: ServiceId,
}

impl TunnelHandler for EchoService {
    fn on_incoming_channel(
        &mut self,
        request: &IncomingChannel<'_>,
    ) -> Result<Box<dyn ChannelHandler>> {
        if request.service != self.service {
            return Err(TunnelError::Forbidden);
        }
        Ok(Box::new(Recorder {
            log: self.log.clone(),
            echo: true,
        }))
    }

    fn on_lane_status(&mut self, state: LaneState) {
        self.log.lock().push(Event::Lane(state));
    }

    fn on_closed(&mut self, reason: &CloseReason) {
        self.log.lock().push(Event::TunnelClosed(reason.clone()));
    }
}

struct Pair {
    client: Tunnel,
    server: Tunnel,
    client_log: Log,
    server_log: Log,
}

const SERVER_OUTER: &str = "10.0.0.1:9000";
const SERVER_LANE: &str = "10.0.0.1:7000";
const CLIENT_LANE: &str = "10.0.0.2:40000";

fn sock(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

impl Pair {
    fn new() -> Self {
        Self::with_config(TunnelConfig::default())
    }

    fn with_config(config: TunnelConfig) -> Self {
        let client_log = Log::default();
        let server_log = Log::default();
        let mut client = Tunnel::new(
            Role::Client,
            config.clone(),
            Box::new(EchoService {
                log: client_log.clone(),
                service: ServiceId::GENERIC,
            }),
        );
        client.set_outer_peer(sock(SERVER_OUTER));
        let server = Tunnel::new(
            Role::Server,
            config,
            Box::new(EchoService {
                log: server_log.clone(),
                service: ServiceId::GENERIC,
            }),
        );
        Self {
            client,
            server,
            client_log,
            server_log,
        }
    }

    fn recorder(&self) -> Box<Recorder> {
        Box::new(Recorder {
            log: self.client_log.clone(),
            echo: false,
        })
    }

    /// Move stream bytes and lane datagrams until both sides are quiet
    fn pump(&mut self) {
        loop {
            let mut moved = false;
            while let Some(bytes) = self.client.poll_output() {
                self.server.handle_input(&bytes);
                moved = true;
            }
            while let Some(bytes) = self.server.poll_output() {
                self.client.handle_input(&bytes);
                moved = true;
            }
            while let Some((to, datagram)) = self.client.poll_lane_transmit() {
                assert_eq!(to, sock(SERVER_LANE));
                self.server.handle_lane_datagram(sock(CLIENT_LANE), &datagram);
                moved = true;
            }
            while let Some((to, datagram)) = self.server.poll_lane_transmit() {
                assert_eq!(to, sock(CLIENT_LANE));
                self.client.handle_lane_datagram(sock(SERVER_LANE), &datagram);
                moved = true;
            }
            if !moved {
                break;
            }
        }
    }

    fn open(&mut self, preference: Preference) -> ChannelId {
        let recorder = self.recorder();
        let id = self
            .client
            .create_channel(ServiceId::GENERIC, preference, recorder)
            .unwrap();
        self.client.open_channel(id, b"").unwrap();
        self.pump();
        assert_eq!(self.client.channel_state(id), Some(ChannelState::Open));
        id
    }
}

#[test]
fn test_channel_usable_only_after_ack() {
    let mut pair = Pair::new();
    let recorder = pair.recorder();
    let id = pair
        .client
        .create_channel(ServiceId::GENERIC, Preference::Stream, recorder)
        .unwrap();
    assert_eq!(pair.client.channel_state(id), Some(ChannelState::Created));
    pair.client.open_channel(id, b"meta").unwrap();
    assert_eq!(pair.client.channel_state(id), Some(ChannelState::Opening));
    assert_eq!(
        pair.client.send(id, &b"early"[..], SendFlags::NONE),
        Err(TunnelError::Forbidden)
    );

    pair.pump();
    assert_eq!(pair.client.channel_state(id), Some(ChannelState::Open));
    assert_eq!(pair.server.channel_state(id), Some(ChannelState::Open));
    assert!(pair.client_log.lock().contains(&Event::Open(1)));
    assert!(pair.server_log.lock().contains(&Event::Open(1)));

    pair.client.send(id, &b"ping"[..], SendFlags::NONE).unwrap();
    pair.pump();
    assert!(pair.server_log.lock().contains(&Event::Data(1, b"ping".to_vec())));
    assert!(pair.client_log.lock().contains(&Event::Data(1, b"ping".to_vec())));
}

#[test]
fn test_refused_channel_reports_peer_error() {
    let mut pair = Pair::new();
    let recorder = pair.recorder();
    let id = pair
        .client
        .create_channel(ServiceId::RTSP, Preference::Stream, recorder)
        .unwrap();
    pair.client.open_channel(id, b"").unwrap();
    pair.pump();

    assert_eq!(
        *pair.client_log.lock(),
        vec![Event::OpenFailed(1, TunnelError::Forbidden), Event::Closed(1)]
    );
    // Observable until the next pass frees it
    assert_eq!(pair.client.channel_state(id), Some(ChannelState::Closed));
    pair.client.timer(1);
    assert_eq!(pair.client.channel_state(id), None);
    assert_eq!(pair.server.channel_count(), 0);
}

#[test]
fn test_closing_tunnel_closes_every_channel() {
    let mut pair = Pair::new();
    let a = pair.open(Preference::Stream);
    let b = pair.open(Preference::Stream);
    assert_eq!((a.raw(), b.raw()), (1, 3));

    pair.client.close();
    assert!(pair.client.is_closed());
    {
        let log = pair.client_log.lock();
        assert!(log.contains(&Event::Closed(1)));
        assert!(log.contains(&Event::Closed(3)));
        assert_eq!(log.last(), Some(&Event::TunnelClosed(CloseReason::Local)));
    }
    assert_eq!(
        pair.client.send(a, &b"late"[..], SendFlags::NONE),
        Err(TunnelError::NoSuchChannel)
    );

    pair.pump();
    let log = pair.server_log.lock();
    assert!(log.contains(&Event::Closed(1)));
    assert!(log.contains(&Event::Closed(3)));
    assert_eq!(log.last(), Some(&Event::TunnelClosed(CloseReason::Goodbye)));
}

#[test]
fn test_peer_close_of_one_channel() {
    let mut pair = Pair::new();
    let a = pair.open(Preference::Stream);
    let b = pair.open(Preference::Stream);

    pair.client.close_channel(a).unwrap();
    pair.pump();
    assert_eq!(pair.server.channel_state(a), Some(ChannelState::Closed));
    assert_eq!(pair.server.channel_state(b), Some(ChannelState::Open));
    assert!(!pair.server.is_closed());
    assert_eq!(pair.client.close_channel(a), Err(TunnelError::NoSuchChannel));
}

#[test]
fn test_lane_comes_up_in_order_and_carries_datagrams() {
    let mut pair = Pair::new();
    let id = pair.open(Preference::Datagram);

    pair.server.offer_lane(7000).unwrap();
    pair.pump();

    let expected = vec![
        LaneState::WaitProbe1,
        LaneState::WaitPeerAck,
        LaneState::Active,
    ];
    let lane_events = |log: &Log| -> Vec<LaneState> {
        log.lock()
            .iter()
            .filter_map(|event| match event {
                Event::Lane(state) => Some(*state),
                _ => None,
            })
            .collect()
    };
    assert_eq!(lane_events(&pair.server_log), expected);
    assert_eq!(lane_events(&pair.client_log), expected);
    assert_eq!(pair.client.lane_state(), LaneState::Active);

    pair.client.send(id, &b"frame"[..], SendFlags::DATAGRAM).unwrap();
    // Went out on the lane, not the stream
    assert!(pair.client.poll_output().is_none());
    pair.pump();
    assert!(pair.server_log.lock().contains(&Event::Data(1, b"frame".to_vec())));
    assert!(pair.client_log.lock().contains(&Event::Data(1, b"frame".to_vec())));
}

#[test]
fn test_datagram_without_lane() {
    let mut pair = Pair::new();
    let id = pair.open(Preference::Stream);

    pair.client.send(id, &b"fallback"[..], SendFlags::DATAGRAM).unwrap();
    pair.client
        .send(id, &b"dropped"[..], SendFlags::FORCE_DATAGRAM)
        .unwrap();
    pair.pump();

    let log = pair.server_log.lock();
    assert!(log.contains(&Event::Data(1, b"fallback".to_vec())));
    assert!(!log.contains(&Event::Data(1, b"dropped".to_vec())));
}

#[test]
fn test_lane_offer_needs_server() {
    let mut pair = Pair::new();
    assert_eq!(pair.client.offer_lane(7000), Err(TunnelError::Forbidden));

    let mut config = TunnelConfig::default();
    config.lane.enabled = false;
    let mut pair = Pair::with_config(config);
    assert_eq!(pair.server.offer_lane(7000), Err(TunnelError::NotImplemented));
}

fn open_request(channel: u16) -> Bytes {
    let request = OpenRequest {
        service: ServiceId::GENERIC,
        preference: Preference::Stream,
        metadata: Bytes::new(),
    };
    Frame::new(FrameKind::OpenReq, channel, request.encode())
        .encode()
        .unwrap()
}

fn replies(tunnel: &mut Tunnel) -> Vec<Frame> {
    let mut stream = BytesMut::new();
    while let Some(bytes) = tunnel.poll_output() {
        stream.extend_from_slice(&bytes);
    }
    std::iter::from_fn(|| Frame::next_from(&mut stream).unwrap()).collect()
}

#[test]
fn test_open_request_checks() {
    let mut pair = Pair::new();

    pair.server.handle_input(&open_request(5));
    let reply = replies(&mut pair.server);
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].kind, FrameKind::OpenAck);

    // Same id again
    pair.server.handle_input(&open_request(5));
    let reply = replies(&mut pair.server);
    assert_eq!(reply[0].kind, FrameKind::OpenNack);
    assert_eq!(reply[0].payload[..], [TunnelError::AlreadyExists.code()]);

    // Even ids belong to the server
    pair.server.handle_input(&open_request(6));
    let reply = replies(&mut pair.server);
    assert_eq!(reply[0].kind, FrameKind::OpenNack);
    assert_eq!(reply[0].payload[..], [TunnelError::Forbidden.code()]);
    assert!(!pair.server.is_closed());
}

#[test]
fn test_tap_link_emits_immediately() {
    let frames: Arc<Mutex<Vec<Bytes>>> = Arc::default();
    let sink = frames.clone();
    let mut tunnel = Tunnel::with_tap(
        Role::Client,
        TunnelConfig::default(),
        Box::new(EchoService {
            log: Log::default(),
            service: ServiceId::GENERIC,
        }),
        move |bytes| sink.lock().push(bytes),
    );
    let id = tunnel
        .create_channel(
            ServiceId::GENERIC,
            Preference::Stream,
            Box::new(Recorder {
                log: Log::default(),
                echo: false,
            }),
        )
        .unwrap();
    tunnel.open_channel(id, b"").unwrap();

    assert!(tunnel.poll_output().is_none());
    let frames = frames.lock();
    assert_eq!(frames.len(), 1);
    let frame = Frame::decode(&frames[0][..]).unwrap();
    assert_eq!((frame.kind, frame.channel), (FrameKind::OpenReq, 1));
}

// ============================================================================
// Runners
// ============================================================================

fn wait_for(log: &Log, check: impl Fn(&[Event]) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check(&log.lock()) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_runners_over_loopback() {
    let mut config = TunnelConfig::default();
    config.tick_ms = 10;
    config.lane.enabled = false;

    let listener = TunnelListener::bind(sock("127.0.0.1:0"), config.clone()).unwrap();
    let addr = listener.local_addr().unwrap();
    let server_log = Log::default();
    let service_log = server_log.clone();
    let server = std::thread::spawn(move || {
        let mut runner = listener
            .accept(Box::new(EchoService {
                log: service_log,
                service: ServiceId::GENERIC,
            }))
            .unwrap();
        runner.run()
    });

    let client_log = Log::default();
    let mut runner = TunnelRunner::connect(
        addr,
        config,
        Box::new(EchoService {
            log: client_log.clone(),
            service: ServiceId::GENERIC,
        }),
    )
    .unwrap();
    let id = runner
        .tunnel_mut()
        .create_channel(
            ServiceId::GENERIC,
            Preference::Stream,
            Box::new(Recorder {
                log: client_log.clone(),
                echo: false,
            }),
        )
        .unwrap();
    runner.tunnel_mut().open_channel(id, b"").unwrap();

    let (control, handle) = runner.spawn().unwrap();
    assert!(wait_for(&client_log, |log| log.contains(&Event::Open(1))));

    assert!(control.trigger(move |tunnel| {
        tunnel.send(id, &b"hello"[..], SendFlags::NONE).unwrap();
    }));
    assert!(wait_for(&client_log, |log| {
        log.contains(&Event::Data(1, b"hello".to_vec()))
    }));

    // Suspend, use the tunnel directly, then resume on a fresh thread
    assert!(control.suspend());
    let (mut runner, exit) = handle.join().unwrap();
    assert_eq!(exit, RunExit::Suspended);
    runner
        .tunnel_mut()
        .send(id, &b"again"[..], SendFlags::NONE)
        .unwrap();
    let (control, handle) = runner.spawn().unwrap();
    assert!(wait_for(&client_log, |log| {
        log.contains(&Event::Data(1, b"again".to_vec()))
    }));

    assert!(control.trigger(|tunnel| tunnel.close()));
    let (runner, exit) = handle.join().unwrap();
    assert_eq!(exit, RunExit::Closed(CloseReason::Local));
    assert!(runner.tunnel().is_closed());
    drop(runner);
    assert!(!control.trigger(|_| {}));

    assert_eq!(
        server.join().unwrap(),
        RunExit::Closed(CloseReason::Goodbye)
    );
    assert!(server_log.lock().contains(&Event::Closed(1)));
}

#[test]
fn test_suspend_while_peer_stops_reading() {
    let mut config = TunnelConfig::default();
    config.tick_ms = 10;
    config.lane.enabled = false;

    // Accepts and then never reads
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = std::thread::spawn(move || listener.accept().unwrap().0);

    let log = Log::default();
    let mut runner = TunnelRunner::connect(
        addr,
        config,
        Box::new(EchoService {
            log: log.clone(),
            service: ServiceId::GENERIC,
        }),
    )
    .unwrap();
    let _stalled = peer.join().unwrap();

    // Far more than the socket buffers on both ends hold
    let metadata = vec![0u8; 60_000];
    for _ in 0..600 {
        let id = runner
            .tunnel_mut()
            .create_channel(
                ServiceId::GENERIC,
                Preference::Stream,
                Box::new(Recorder {
                    log: log.clone(),
                    echo: false,
                }),
            )
            .unwrap();
        runner.tunnel_mut().open_channel(id, &metadata).unwrap();
    }

    let (control, handle) = runner.spawn().unwrap();
    std::thread::sleep(Duration::from_millis(200));
    let triggered = Arc::new(Mutex::new(false));
    let flag = triggered.clone();
    assert!(control.trigger(move |_| *flag.lock() = true));
    assert!(control.suspend());

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = done_tx.send(handle.join().unwrap());
    });
    let (runner, exit) = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(exit, RunExit::Suspended);
    assert!(*triggered.lock());
    assert!(!runner.tunnel().is_closed());
}

//! UDP lane handshake
//!
//! ```text
//!  server                                    client
//!    │ ── LANE_OFFER{token, port} (stream) ──► │  Off → WaitProbe1
//!    │ Off → WaitProbe1                        │
//!    │ ◄──────────── PROBE ─────────────────── │  (repeated)
//!    │ WaitPeerAck (peer bound)                │
//!    │ ───────────── PROBE_ACK ──────────────► │  WaitPeerAck
//!    │ ◄──────────── CONFIRM ───────────────── │  (repeated)
//!    │ Active                                  │
//!    │ ───────────── CONFIRM (echo) ─────────► │  Active
//! ```
//!
//! Datagram: `0x56 | kind | token u32 | [channel u16 | payload]`.
//! Every datagram carries the offer token; anything else is ignored.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use std::net::SocketAddr;
use tracing::{debug, info, trace};

use crate::config::LaneConfig;
use crate::tunnel::Role;
use crate::{Result, TunnelError};

pub const LANE_MAGIC: u8 = 0x56;

const HEADER_LEN: usize = 6;

mod kind {
    pub const PROBE: u8 = 1;
    pub const PROBE_ACK: u8 = 2;
    pub const CONFIRM: u8 = 3;
    pub const DATA: u8 = 4;
    pub const KEEPALIVE: u8 = 5;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LaneState {
    #[default]
    Off,
    WaitProbe1,
    WaitPeerAck,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanePacket {
    Probe { token: u32 },
    ProbeAck { token: u32 },
    Confirm { token: u32 },
    Data {
        token: u32,
        channel: u16,
        payload: Bytes,
    },
    Keepalive { token: u32 },
}

impl LanePacket {
    pub fn token(&self) -> u32 {
        match self {
            LanePacket::Probe { token }
            | LanePacket::ProbeAck { token }
            | LanePacket::Confirm { token }
            | LanePacket::Data { token, .. }
            | LanePacket::Keepalive { token } => *token,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 2);
        buf.put_u8(LANE_MAGIC);
        let (code, token) = match self {
            LanePacket::Probe { token } => (kind::PROBE, token),
            LanePacket::ProbeAck { token } => (kind::PROBE_ACK, token),
            LanePacket::Confirm { token } => (kind::CONFIRM, token),
            LanePacket::Data { token, .. } => (kind::DATA, token),
            LanePacket::Keepalive { token } => (kind::KEEPALIVE, token),
        };
        buf.put_u8(code);
        buf.put_u32(*token);
        if let LanePacket::Data {
            channel, payload, ..
        } = self
        {
            buf.put_u16(*channel);
            buf.extend_from_slice(payload);
        }
        buf.freeze()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(TunnelError::PacketTooShort);
        }
        let mut buf = bytes;
        if buf.get_u8() != LANE_MAGIC {
            return Err(TunnelError::Malformed);
        }
        let code = buf.get_u8();
        let token = buf.get_u32();
        match code {
            kind::PROBE => Ok(LanePacket::Probe { token }),
            kind::PROBE_ACK => Ok(LanePacket::ProbeAck { token }),
            kind::CONFIRM => Ok(LanePacket::Confirm { token }),
            kind::KEEPALIVE => Ok(LanePacket::Keepalive { token }),
            kind::DATA => {
                if buf.remaining() < 2 {
                    return Err(TunnelError::PacketTooShort);
                }
                let channel = buf.get_u16();
                Ok(LanePacket::Data {
                    token,
                    channel,
                    payload: Bytes::copy_from_slice(buf),
                })
            }
            _ => Err(TunnelError::Malformed),
        }
    }
}

/// Lane sub-state of one tunnel
#[derive(Debug)]
pub(crate) struct Lane {
    config: LaneConfig,
    role: Role,
    state: LaneState,
    token: u32,
    peer: Option<SocketAddr>,
    attempts: u32,
    next_send: u64,
    deadline: u64,
    last_rx: u64,
    last_tx: u64,
    transmits: VecDeque<(SocketAddr, Bytes)>,
    changes: Vec<LaneState>,
}

impl Lane {
    pub fn new(config: LaneConfig, role: Role) -> Self {
        Self {
            config,
            role,
            state: LaneState::Off,
            token: 0,
            peer: None,
            attempts: 0,
            next_send: 0,
            deadline: 0,
            last_rx: 0,
            last_tx: 0,
            transmits: VecDeque::new(),
            changes: Vec::new(),
        }
    }

    pub fn state(&self) -> LaneState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == LaneState::Active
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn set_state(&mut self, state: LaneState) {
        if state == self.state {
            return;
        }
        debug!("lane ({:?}): {:?} -> {:?}", self.role, self.state, state);
        if state == LaneState::Off {
            self.peer = None;
        } else if state == LaneState::Active {
            info!("UDP lane active with {:?}", self.peer);
        }
        self.state = state;
        self.changes.push(state);
    }

    /// Transitions since the last call, in order
    pub fn take_changes(&mut self) -> Vec<LaneState> {
        std::mem::take(&mut self.changes)
    }

    fn budget(&self) -> u64 {
        self.config.probe_interval_ticks * self.config.max_probes as u64
    }

    fn send(&mut self, packet: LanePacket, now: u64) {
        if let Some(peer) = self.peer {
            trace!("lane -> {}: {:?}", peer, packet);
            self.transmits.push_back((peer, packet.encode()));
            self.last_tx = now;
        }
    }

    /// Server: start waiting for probes
    pub fn offer(&mut self, token: u32, now: u64) {
        self.token = token;
        self.peer = None;
        self.deadline = now + self.budget();
        self.set_state(LaneState::WaitProbe1);
    }

    /// Client: start probing the offered address
    pub fn on_offer(&mut self, token: u32, target: SocketAddr, now: u64) {
        self.set_state(LaneState::Off);
        self.token = token;
        self.peer = Some(target);
        self.set_state(LaneState::WaitProbe1);
        self.attempts = 1;
        self.next_send = now + self.config.probe_interval_ticks;
        self.send(LanePacket::Probe { token }, now);
    }

    pub fn shutdown(&mut self) {
        self.transmits.clear();
        self.set_state(LaneState::Off);
    }

    /// Returns `(channel, payload)` for data datagrams
    pub fn handle_datagram(&mut self, from: SocketAddr, bytes: &[u8], now: u64) -> Option<(u16, Bytes)> {
        let packet = match LanePacket::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                trace!("lane: dropped datagram from {}: {}", from, e);
                return None;
            }
        };
        if self.state == LaneState::Off || packet.token() != self.token {
            trace!("lane: ignored {:?} from {}", packet, from);
            return None;
        }
        // Only the server learns the peer, from the first probe
        let bound = self.peer == Some(from);
        if !bound && !(self.role == Role::Server && self.state == LaneState::WaitProbe1) {
            trace!("lane: datagram from unexpected {}", from);
            return None;
        }
        self.last_rx = now;

        match (self.role, self.state, packet) {
            (Role::Server, LaneState::WaitProbe1, LanePacket::Probe { token }) => {
                self.peer = Some(from);
                self.set_state(LaneState::WaitPeerAck);
                self.deadline = now + self.budget();
                self.send(LanePacket::ProbeAck { token }, now);
            }
            (Role::Server, LaneState::WaitPeerAck, LanePacket::Probe { token }) => {
                self.send(LanePacket::ProbeAck { token }, now);
            }
            (Role::Server, LaneState::WaitPeerAck, LanePacket::Confirm { token }) => {
                self.set_state(LaneState::Active);
                self.send(LanePacket::Confirm { token }, now);
            }
            (Role::Server, LaneState::Active, LanePacket::Confirm { token }) => {
                // Our echo was lost
                self.send(LanePacket::Confirm { token }, now);
            }
            (Role::Client, LaneState::WaitProbe1, LanePacket::ProbeAck { token }) => {
                self.set_state(LaneState::WaitPeerAck);
                self.attempts = 1;
                self.next_send = now + self.config.probe_interval_ticks;
                self.send(LanePacket::Confirm { token }, now);
            }
            (Role::Client, LaneState::WaitPeerAck, LanePacket::Confirm { .. }) => {
                self.set_state(LaneState::Active);
            }
            (_, LaneState::Active, LanePacket::Data {
                channel, payload, ..
            }) => return Some((channel, payload)),
            (_, _, packet) => trace!("lane: {:?} ignored in {:?}", packet, self.state),
        }
        None
    }

    /// Queue a data datagram; false unless the lane is active
    pub fn send_data(&mut self, channel: u16, payload: Bytes, now: u64) -> bool {
        if !self.is_active() {
            return false;
        }
        let token = self.token;
        self.send(
            LanePacket::Data {
                token,
                channel,
                payload,
            },
            now,
        );
        true
    }

    pub fn timer(&mut self, now: u64) {
        let token = self.token;
        match (self.role, self.state) {
            (_, LaneState::Off) => {}
            (Role::Server, LaneState::WaitProbe1 | LaneState::WaitPeerAck) => {
                if now >= self.deadline {
                    debug!("lane: handshake timed out");
                    self.set_state(LaneState::Off);
                }
            }
            (Role::Client, LaneState::WaitProbe1 | LaneState::WaitPeerAck) => {
                if now < self.next_send {
                    return;
                }
                if self.attempts >= self.config.max_probes {
                    debug!("lane: no answer after {} attempts", self.attempts);
                    self.set_state(LaneState::Off);
                    return;
                }
                self.attempts += 1;
                self.next_send = now + self.config.probe_interval_ticks;
                let packet = if self.state == LaneState::WaitProbe1 {
                    LanePacket::Probe { token }
                } else {
                    LanePacket::Confirm { token }
                };
                self.send(packet, now);
            }
            (_, LaneState::Active) => {
                if now.saturating_sub(self.last_rx) >= self.config.idle_timeout_ticks {
                    debug!("lane: idle for {} ticks", now - self.last_rx);
                    self.set_state(LaneState::Off);
                } else if now.saturating_sub(self.last_tx) >= self.config.keepalive_ticks {
                    self.send(LanePacket::Keepalive { token }, now);
                }
            }
        }
    }

    pub fn poll_transmit(&mut self) -> Option<(SocketAddr, Bytes)> {
        self.transmits.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_addr() -> SocketAddr {
        "192.0.2.1:40000".parse().unwrap()
    }

    fn client_addr() -> SocketAddr {
        "198.51.100.7:50000".parse().unwrap()
    }

    /// Deliver every queued datagram in both directions
    fn exchange(server: &mut Lane, client: &mut Lane, now: u64) {
        loop {
            let mut moved = false;
            while let Some((to, bytes)) = client.poll_transmit() {
                assert_eq!(to, server_addr());
                server.handle_datagram(client_addr(), &bytes, now);
                moved = true;
            }
            while let Some((to, bytes)) = server.poll_transmit() {
                assert_eq!(to, client_addr());
                client.handle_datagram(server_addr(), &bytes, now);
                moved = true;
            }
            if !moved {
                break;
            }
        }
    }

    #[test]
    fn test_handshake_passes_every_state_in_order() {
        let mut server = Lane::new(LaneConfig::default(), Role::Server);
        let mut client = Lane::new(LaneConfig::default(), Role::Client);

        server.offer(0xABCD, 0);
        client.on_offer(0xABCD, server_addr(), 0);
        exchange(&mut server, &mut client, 0);

        let expected = vec![
            LaneState::WaitProbe1,
            LaneState::WaitPeerAck,
            LaneState::Active,
        ];
        assert_eq!(server.take_changes(), expected);
        assert_eq!(client.take_changes(), expected);
        assert_eq!(server.peer(), Some(client_addr()));

        assert!(client.send_data(3, Bytes::from_static(b"rtp"), 1));
        let (_, bytes) = client.poll_transmit().unwrap();
        assert_eq!(
            server.handle_datagram(client_addr(), &bytes, 1),
            Some((3, Bytes::from_static(b"rtp")))
        );
    }

    #[test]
    fn test_wrong_token_ignored() {
        let mut server = Lane::new(LaneConfig::default(), Role::Server);
        server.offer(1, 0);
        let probe = LanePacket::Probe { token: 2 }.encode();
        server.handle_datagram(client_addr(), &probe, 0);
        assert_eq!(server.state(), LaneState::WaitProbe1);
        assert!(server.poll_transmit().is_none());
    }

    #[test]
    fn test_client_gives_up() {
        let config = LaneConfig::default();
        let mut client = Lane::new(config.clone(), Role::Client);
        client.on_offer(7, server_addr(), 0);
        let mut now = 0;
        while client.state() != LaneState::Off && now < 1000 {
            now += 1;
            client.timer(now);
        }
        assert_eq!(client.state(), LaneState::Off);
        assert_eq!(
            std::iter::from_fn(|| client.poll_transmit()).count(),
            config.max_probes as usize
        );
    }

    #[test]
    fn test_active_lane_goes_idle() {
        let config = LaneConfig::default();
        let mut server = Lane::new(config.clone(), Role::Server);
        let mut client = Lane::new(config.clone(), Role::Client);
        server.offer(5, 0);
        client.on_offer(5, server_addr(), 0);
        exchange(&mut server, &mut client, 0);
        assert!(server.is_active());

        // Client goes silent; server keeps sending keepalives then gives up
        server.timer(config.keepalive_ticks);
        assert!(matches!(
            server.poll_transmit().map(|(_, b)| LanePacket::decode(&b).unwrap()),
            Some(LanePacket::Keepalive { token: 5 })
        ));
        server.timer(config.idle_timeout_ticks);
        assert_eq!(server.state(), LaneState::Off);
        assert!(!server.send_data(1, Bytes::new(), config.idle_timeout_ticks));
    }

    #[test]
    fn test_decode_rejects() {
        assert_eq!(LanePacket::decode(&[0x56, 1]), Err(TunnelError::PacketTooShort));
        assert_eq!(
            LanePacket::decode(&[0x57, 1, 0, 0, 0, 1]),
            Err(TunnelError::Malformed)
        );
        assert_eq!(
            LanePacket::decode(&[0x56, 4, 0, 0, 0, 1, 9]),
            Err(TunnelError::PacketTooShort)
        );
    }
}

//! Sans-IO tunnel core
//!
//! Bytes from the outer link go in through [`Tunnel::handle_input`] and
//! lane datagrams through [`Tunnel::handle_lane_datagram`]. Output is
//! either queued for [`Tunnel::poll_output`] or, for a tap link, handed to
//! the sink as soon as it is produced. Handlers run inside these calls and
//! queue their own sends through an [`Outbox`].
//!
//! Closing is deferred: a closed channel keeps its slot (and its state is
//! observable) until the next `timer` or `handle_input` pass frees it.

use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::channel::{
    ChannelHandler, ChannelId, ChannelState, IncomingChannel, Outbox, OutboxOp, Preference,
    SendFlags, ServiceId, TunnelHandler,
};
use crate::frame::{Frame, FrameKind, LaneOffer, OpenRequest, FLAG_DATAGRAM, MAX_PAYLOAD_SIZE};
use crate::lane::{Lane, LaneState};
use crate::{CloseReason, Result, TunnelConfig, TunnelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Device side; allocates odd channel ids
    Client,
    /// Relay side; allocates even channel ids and offers the lane
    Server,
}

type TapSink = Box<dyn FnMut(Bytes) + Send>;

enum OuterLink {
    /// Output queued for `poll_output`
    Stream,
    Tap(TapSink),
}

struct Channel {
    service: ServiceId,
    preference: Preference,
    state: ChannelState,
    handler: Box<dyn ChannelHandler>,
}

pub struct Tunnel {
    id: Uuid,
    role: Role,
    config: TunnelConfig,
    handler: Box<dyn TunnelHandler>,
    link: OuterLink,
    secure_link: bool,
    outer_peer: Option<SocketAddr>,
    closed: Option<CloseReason>,
    channels: BTreeMap<ChannelId, Channel>,
    next_channel: u16,
    lane: Lane,
    outbox: Outbox,
    input: BytesMut,
    output: BytesMut,
    now: u64,
    last_rx: u64,
    last_tx: u64,
}

impl Tunnel {
    /// Tunnel over a stream; the owner moves bytes with `poll_output`
    pub fn new(role: Role, config: TunnelConfig, handler: Box<dyn TunnelHandler>) -> Self {
        let lane = Lane::new(config.lane.clone(), role);
        let id = Uuid::new_v4();
        info!("tunnel {} created ({:?})", id, role);
        Self {
            id,
            role,
            config,
            handler,
            link: OuterLink::Stream,
            secure_link: false,
            outer_peer: None,
            closed: None,
            channels: BTreeMap::new(),
            next_channel: match role {
                Role::Client => 1,
                Role::Server => 2,
            },
            lane,
            outbox: Outbox::default(),
            input: BytesMut::new(),
            output: BytesMut::new(),
            now: 0,
            last_rx: 0,
            last_tx: 0,
        }
    }

    /// Tunnel whose output is handed to `sink` instead of a stream
    pub fn with_tap(
        role: Role,
        config: TunnelConfig,
        handler: Box<dyn TunnelHandler>,
        sink: impl FnMut(Bytes) + Send + 'static,
    ) -> Self {
        let mut tunnel = Self::new(role, config, handler);
        tunnel.link = OuterLink::Tap(Box::new(sink));
        tunnel
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Address of the far end of the outer link; the client aims lane
    /// probes at its IP
    pub fn set_outer_peer(&mut self, addr: SocketAddr) {
        self.outer_peer = Some(addr);
    }

    pub fn outer_peer(&self) -> Option<SocketAddr> {
        self.outer_peer
    }

    /// Whether the outer link is encrypted; secure-stream channels need it
    pub fn set_secure_link(&mut self, secure: bool) {
        self.secure_link = secure;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.closed.as_ref()
    }

    pub fn lane_state(&self) -> LaneState {
        self.lane.state()
    }

    pub fn channel_state(&self, id: ChannelId) -> Option<ChannelState> {
        self.channels.get(&id).map(|channel| channel.state)
    }

    pub fn channel_service(&self, id: ChannelId) -> Option<ServiceId> {
        self.channels.get(&id).map(|channel| channel.service)
    }

    /// Channels holding a slot, closed ones awaiting release included
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    // ========================================================================
    // Channels
    // ========================================================================

    /// Reserve a channel locally; nothing is sent until `open_channel`
    pub fn create_channel(
        &mut self,
        service: ServiceId,
        preference: Preference,
        handler: Box<dyn ChannelHandler>,
    ) -> Result<ChannelId> {
        if self.is_closed() {
            return Err(TunnelError::Forbidden);
        }
        if preference == Preference::SecureStream && !self.secure_link {
            return Err(TunnelError::NotImplemented);
        }
        let id = self.allocate()?;
        self.channels.insert(
            id,
            Channel {
                service,
                preference,
                state: ChannelState::Created,
                handler,
            },
        );
        debug!("tunnel {}: {} created for {}", self.id, id, service);
        Ok(id)
    }

    fn allocate(&mut self) -> Result<ChannelId> {
        if self.channels.len() >= self.config.max_channels {
            return Err(TunnelError::Internal);
        }
        // Ids keep the role's parity and skip 0 and those in use
        loop {
            let id = ChannelId(self.next_channel);
            self.next_channel = self.next_channel.wrapping_add(2);
            if self.next_channel < 2 {
                self.next_channel = match self.role {
                    Role::Client => 1,
                    Role::Server => 2,
                };
            }
            if !self.channels.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    /// Ask the peer to open a created channel; usable after OPEN_ACK
    pub fn open_channel(&mut self, id: ChannelId, metadata: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(TunnelError::Forbidden);
        }
        let channel = self.channels.get_mut(&id).ok_or(TunnelError::NoSuchChannel)?;
        match channel.state {
            ChannelState::Created => {}
            ChannelState::Closed => return Err(TunnelError::NoSuchChannel),
            ChannelState::Opening | ChannelState::Open => return Err(TunnelError::AlreadyExists),
        }
        let request = OpenRequest {
            service: channel.service,
            preference: channel.preference,
            metadata: Bytes::copy_from_slice(metadata),
        };
        let payload = request.encode();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TunnelError::Malformed);
        }
        channel.state = ChannelState::Opening;
        self.queue_frame(Frame::new(FrameKind::OpenReq, id.0, payload));
        Ok(())
    }

    pub fn close_channel(&mut self, id: ChannelId) -> Result<()> {
        let channel = self.channels.get_mut(&id).ok_or(TunnelError::NoSuchChannel)?;
        let was = channel.state;
        match was {
            ChannelState::Closed => return Err(TunnelError::NoSuchChannel),
            ChannelState::Created => {}
            ChannelState::Opening | ChannelState::Open => {
                if !self.is_closed() {
                    self.queue_frame(Frame::new(FrameKind::Close, id.0, Bytes::new()));
                }
            }
        }
        self.mark_closed(id);
        Ok(())
    }

    fn mark_closed(&mut self, id: ChannelId) {
        if let Some(channel) = self.channels.get_mut(&id) {
            if channel.state != ChannelState::Closed {
                debug!("tunnel {}: {} closed", self.id, id);
                channel.state = ChannelState::Closed;
                channel.handler.on_closed(id);
            }
        }
    }

    /// Send on an open channel. `DATAGRAM` uses the lane when active and
    /// falls back to the stream; `FORCE_DATAGRAM` drops instead.
    pub fn send(&mut self, id: ChannelId, data: impl Into<Bytes>, flags: SendFlags) -> Result<()> {
        let data = data.into();
        let channel = self.channels.get(&id).ok_or(TunnelError::NoSuchChannel)?;
        match channel.state {
            ChannelState::Open => {}
            ChannelState::Closed => return Err(TunnelError::NoSuchChannel),
            ChannelState::Created | ChannelState::Opening => return Err(TunnelError::Forbidden),
        }
        if self.is_closed() {
            return Err(TunnelError::Forbidden);
        }
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(TunnelError::Malformed);
        }

        let datagram = flags.contains(SendFlags::DATAGRAM)
            || channel.preference == Preference::Datagram;
        if flags.contains(SendFlags::FORCE_DATAGRAM) {
            if !self.lane.send_data(id.0, data, self.now) {
                trace!("tunnel {}: lane down, forced datagram on {} dropped", self.id, id);
            }
            return Ok(());
        }
        if datagram {
            if self.lane.send_data(id.0, data.clone(), self.now) {
                return Ok(());
            }
            self.queue_frame(Frame::new(FrameKind::Data, id.0, data).with_flags(FLAG_DATAGRAM));
        } else {
            self.queue_frame(Frame::new(FrameKind::Data, id.0, data));
        }
        Ok(())
    }

    // ========================================================================
    // Tunnel lifetime
    // ========================================================================

    /// Say goodbye and force-close every channel
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.queue_frame(Frame::control(FrameKind::Goodbye));
        self.shutdown(CloseReason::Local);
    }

    /// The outer link failed
    pub fn fail(&mut self, reason: CloseReason) {
        self.shutdown(reason);
    }

    fn shutdown(&mut self, reason: CloseReason) {
        if self.is_closed() {
            return;
        }
        info!("tunnel {} closed: {}", self.id, reason);
        let open: Vec<ChannelId> = self.channels.keys().copied().collect();
        for id in open {
            self.mark_closed(id);
        }
        self.lane.shutdown();
        self.report_lane();
        self.closed = Some(reason.clone());
        self.handler.on_closed(&reason);
    }

    /// Server: offer a UDP lane listening on `port`
    pub fn offer_lane(&mut self, port: u16) -> Result<()> {
        if self.role != Role::Server {
            return Err(TunnelError::Forbidden);
        }
        if !self.config.lane.enabled {
            return Err(TunnelError::NotImplemented);
        }
        if self.is_closed() {
            return Err(TunnelError::Forbidden);
        }
        let token = random_token();
        self.lane.offer(token, self.now);
        self.report_lane();
        self.queue_frame(Frame::new(
            FrameKind::LaneOffer,
            0,
            LaneOffer { token, port }.encode(),
        ));
        Ok(())
    }

    // ========================================================================
    // Timers and input
    // ========================================================================

    pub fn timer(&mut self, ticks: u64) {
        self.now += ticks;
        self.release_closed();
        if self.is_closed() {
            return;
        }

        if self.now.saturating_sub(self.last_rx) >= self.config.idle_timeout_ticks {
            warn!("tunnel {}: nothing heard for {} ticks", self.id, self.now - self.last_rx);
            self.shutdown(CloseReason::Timeout);
            return;
        }
        if self.now.saturating_sub(self.last_tx) >= self.config.keepalive_ticks {
            self.queue_frame(Frame::control(FrameKind::Keepalive));
        }
        self.lane.timer(self.now);
        self.report_lane();
    }

    /// Bytes read from the outer link
    pub fn handle_input(&mut self, bytes: &[u8]) {
        self.release_closed();
        if self.is_closed() {
            return;
        }
        self.input.extend_from_slice(bytes);
        loop {
            match Frame::next_from(&mut self.input) {
                Ok(Some(frame)) => {
                    self.last_rx = self.now;
                    self.handle_frame(frame);
                    if self.is_closed() {
                        self.input.clear();
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    self.input.clear();
                    self.shutdown(CloseReason::ProtocolError(e.to_string()));
                    return;
                }
            }
        }
    }

    /// A datagram received on the lane socket
    pub fn handle_lane_datagram(&mut self, from: SocketAddr, bytes: &[u8]) {
        if self.is_closed() {
            return;
        }
        let data = self.lane.handle_datagram(from, bytes, self.now);
        self.report_lane();
        if let Some((channel, payload)) = data {
            self.deliver(ChannelId(channel), payload);
        }
    }

    fn release_closed(&mut self) {
        self.channels
            .retain(|_, channel| channel.state != ChannelState::Closed);
    }

    fn handle_frame(&mut self, frame: Frame) {
        let id = ChannelId(frame.channel);
        match frame.kind {
            FrameKind::OpenReq => self.on_open_request(id, &frame.payload),
            FrameKind::OpenAck => {
                let Some(channel) = self.channels.get_mut(&id) else {
                    trace!("tunnel {}: OPEN_ACK for unknown {}", self.id, id);
                    return;
                };
                if channel.state != ChannelState::Opening {
                    return;
                }
                channel.state = ChannelState::Open;
                debug!("tunnel {}: {} open", self.id, id);
                channel.handler.on_open(id, &mut self.outbox);
                self.drain_outbox();
            }
            FrameKind::OpenNack => {
                let error = frame
                    .payload
                    .first()
                    .map(|&code| TunnelError::from_code(code))
                    .unwrap_or(TunnelError::Unknown);
                let Some(channel) = self.channels.get_mut(&id) else {
                    return;
                };
                if channel.state != ChannelState::Opening {
                    return;
                }
                debug!("tunnel {}: {} refused: {}", self.id, id, error);
                channel.handler.on_open_failed(id, error);
                self.mark_closed(id);
            }
            FrameKind::Data => self.deliver(id, frame.payload),
            FrameKind::Close => self.mark_closed(id),
            FrameKind::Keepalive => {}
            FrameKind::Goodbye => self.shutdown(CloseReason::Goodbye),
            FrameKind::LaneOffer => self.on_lane_offer(&frame.payload),
        }
    }

    fn on_open_request(&mut self, id: ChannelId, payload: &Bytes) {
        let result = self.accept_channel(id, payload);
        match result {
            Ok(()) => {
                self.queue_frame(Frame::new(FrameKind::OpenAck, id.0, Bytes::new()));
                if let Some(channel) = self.channels.get_mut(&id) {
                    channel.handler.on_open(id, &mut self.outbox);
                }
                self.drain_outbox();
            }
            Err(error) => {
                debug!("tunnel {}: refusing {}: {}", self.id, id, error);
                self.queue_frame(Frame::new(
                    FrameKind::OpenNack,
                    id.0,
                    Bytes::copy_from_slice(&[error.code()]),
                ));
            }
        }
    }

    fn accept_channel(&mut self, id: ChannelId, payload: &Bytes) -> Result<()> {
        if self.channels.contains_key(&id) {
            return Err(TunnelError::AlreadyExists);
        }
        let peer_parity = match self.role {
            Role::Client => 0,
            Role::Server => 1,
        };
        if id.0 == 0 || id.0 % 2 != peer_parity {
            return Err(TunnelError::Forbidden);
        }
        let request = OpenRequest::decode(payload)?;
        if request.preference == Preference::SecureStream && !self.secure_link {
            return Err(TunnelError::NotImplemented);
        }
        if self.channels.len() >= self.config.max_channels {
            return Err(TunnelError::Internal);
        }

        let handler = self.handler.on_incoming_channel(&IncomingChannel {
            id,
            service: request.service,
            preference: request.preference,
            metadata: &request.metadata,
        })?;
        info!("tunnel {}: accepted {} for {}", self.id, id, request.service);
        self.channels.insert(
            id,
            Channel {
                service: request.service,
                preference: request.preference,
                state: ChannelState::Open,
                handler,
            },
        );
        Ok(())
    }

    fn deliver(&mut self, id: ChannelId, data: Bytes) {
        match self.channels.get_mut(&id) {
            Some(channel) if channel.state == ChannelState::Open => {
                channel.handler.on_data(id, data, &mut self.outbox);
                self.drain_outbox();
            }
            _ => trace!("tunnel {}: data for inactive {} dropped", self.id, id),
        }
    }

    fn on_lane_offer(&mut self, payload: &[u8]) {
        if self.role != Role::Client || !self.config.lane.enabled {
            return;
        }
        let offer = match LaneOffer::decode(payload) {
            Ok(offer) => offer,
            Err(e) => {
                debug!("tunnel {}: bad lane offer: {}", self.id, e);
                return;
            }
        };
        let Some(peer) = self.outer_peer else {
            debug!("tunnel {}: lane offered but outer peer unknown", self.id);
            return;
        };
        let target = SocketAddr::new(peer.ip(), offer.port);
        debug!("tunnel {}: probing lane at {}", self.id, target);
        self.lane.on_offer(offer.token, target, self.now);
        self.report_lane();
    }

    fn drain_outbox(&mut self) {
        while !self.outbox.is_empty() {
            let ops = std::mem::take(&mut self.outbox.ops);
            for op in ops {
                let result = match op {
                    OutboxOp::Send {
                        channel,
                        data,
                        flags,
                    } => self.send(channel, data, flags),
                    OutboxOp::Close(channel) => self.close_channel(channel),
                };
                if let Err(e) = result {
                    debug!("tunnel {}: handler request failed: {}", self.id, e);
                }
            }
        }
    }

    fn report_lane(&mut self) {
        for state in self.lane.take_changes() {
            self.handler.on_lane_status(state);
        }
    }

    // ========================================================================
    // Output
    // ========================================================================

    fn queue_frame(&mut self, frame: Frame) {
        if let Err(e) = frame.encode_into(&mut self.output) {
            warn!("tunnel {}: {:?} frame not sent: {}", self.id, frame.kind, e);
            return;
        }
        self.last_tx = self.now;
        if let OuterLink::Tap(sink) = &mut self.link {
            sink(self.output.split().freeze());
        }
    }

    /// Bytes to write to the outer stream
    pub fn poll_output(&mut self) -> Option<Bytes> {
        if self.output.is_empty() {
            None
        } else {
            Some(self.output.split().freeze())
        }
    }

    /// Datagram to send from the lane socket
    pub fn poll_lane_transmit(&mut self) -> Option<(SocketAddr, Bytes)> {
        self.lane.poll_transmit()
    }
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("channels", &self.channels.len())
            .field("lane", &self.lane.state())
            .field("closed", &self.closed)
            .finish()
    }
}

fn random_token() -> u32 {
    let bytes = Uuid::new_v4().into_bytes();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

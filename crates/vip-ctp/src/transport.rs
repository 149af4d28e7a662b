//! Connection table and packet dispatch
//!
//! Connections are keyed by a [`Cid`] that doubles as this end's wire
//! connection id. Ids are never reused by a `Transport`, so a stale `Cid`
//! simply misses the table and yields [`CtpError::Conn`].
//!
//! Incoming packets are matched by `dst conn` when the peer knows it, and
//! by `(local port or tap, source address, src conn)` for the first
//! packets of an incoming connection, so a peer whose NAT mapping moves
//! stays on one connection. A DATA or FIN for a connection that no longer
//! exists is answered with RESET.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::net::{IpAddr, SocketAddr, SocketAddrV6};
use tracing::{debug, info, trace, warn};
use vip_core::address::SUB_NONE;
use vip_core::LogicalAddress;
use vip_crp::{Identity, IdentityId, Resolution, Resolve, ResolveStatus};

use crate::arq::{Accept, Segment};
use crate::connection::{CloseCause, Connection, ConnectionInfo, ConnectionState};
use crate::packet::{CtpPacket, PacketKind};
use crate::{CtpConfig, CtpError, Result};

/// Received broadcasts kept until read
const MAX_BROADCASTS: usize = 256;

/// Opaque connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid(u32);

impl Cid {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cid{}", self.0)
    }
}

/// Handle for an externally driven packet pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TapId(u32);

impl TapId {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Where a connection's packets travel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Path {
    Udp { local_port: u16, remote: SocketAddr },
    Tap(TapId),
}

impl Path {
    /// Local end of the path; stays put when the peer's NAT mapping moves
    fn via(&self) -> Via {
        match self {
            Path::Udp { local_port, .. } => Via::Port(*local_port),
            Path::Tap(tap) => Via::Tap(*tap),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Via {
    Port(u16),
    Tap(TapId),
}

/// Demux key of an incoming connection before the peer learns our id
pub(crate) type IncomingKey = (Via, LogicalAddress, u32);

/// A packet the owner must deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transmit {
    Udp {
        local_port: u16,
        destination: SocketAddr,
        payload: Bytes,
    },
    Tap {
        tap: TapId,
        payload: Bytes,
    },
}

impl Transmit {
    pub(crate) fn new(path: Path, payload: Bytes) -> Self {
        match path {
            Path::Udp { local_port, remote } => Transmit::Udp {
                local_port,
                destination: remote,
                payload,
            },
            Path::Tap(tap) => Transmit::Tap { tap, payload },
        }
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            Transmit::Udp { payload, .. } | Transmit::Tap { payload, .. } => payload,
        }
    }
}

/// Connectionless datagram received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub source: LogicalAddress,
    pub path: Path,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer opened a connection to one of our addresses
    Incoming { cid: Cid },
    /// New in-order data is ready for `read`
    Readable { cid: Cid },
    Closed { cid: Cid, cause: CloseCause },
}

pub struct Transport {
    config: CtpConfig,
    identities: BTreeMap<IdentityId, Identity>,
    taps: HashMap<TapId, Vec<LogicalAddress>>,
    connections: BTreeMap<Cid, Connection>,
    incoming: HashMap<IncomingKey, Cid>,
    next_cid: u32,
    next_tap: u32,
    now: u64,
    transmits: VecDeque<Transmit>,
    events: VecDeque<TransportEvent>,
    broadcasts: VecDeque<Broadcast>,
}

impl Transport {
    pub fn new(config: CtpConfig) -> Self {
        Self {
            config,
            identities: BTreeMap::new(),
            taps: HashMap::new(),
            connections: BTreeMap::new(),
            incoming: HashMap::new(),
            next_cid: 0,
            next_tap: 0,
            now: 0,
            transmits: VecDeque::new(),
            events: VecDeque::new(),
            broadcasts: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &CtpConfig {
        &self.config
    }

    // ========================================================================
    // Endpoints
    // ========================================================================

    /// Make an identity's address reachable over its UDP port
    pub fn add_identity(&mut self, identity: Identity) {
        self.identities.insert(identity.id, identity);
    }

    /// Forget an identity, force-closing every connection opened through it
    pub fn remove_identity(&mut self, id: IdentityId) -> Vec<Cid> {
        self.identities.remove(&id);
        let doomed: Vec<Cid> = self
            .connections
            .values()
            .filter(|conn| conn.identity == Some(id))
            .map(|conn| conn.cid)
            .collect();
        for cid in &doomed {
            self.kill(*cid, CloseCause::IdentityRemoved);
        }
        doomed
    }

    /// Register a tap accepting connections for `addresses` (all if empty)
    pub fn add_tap(&mut self, addresses: Vec<LogicalAddress>) -> TapId {
        self.next_tap += 1;
        let tap = TapId(self.next_tap);
        self.taps.insert(tap, addresses);
        tap
    }

    /// Remove a tap; its connections are reset
    pub fn remove_tap(&mut self, tap: TapId) -> Vec<Cid> {
        self.taps.remove(&tap);
        let doomed: Vec<Cid> = self
            .connections
            .values()
            .filter(|conn| conn.path == Some(Path::Tap(tap)))
            .map(|conn| conn.cid)
            .collect();
        for cid in &doomed {
            self.kill(*cid, CloseCause::Reset);
        }
        doomed
    }

    fn identity(&self, id: IdentityId) -> Result<Identity> {
        self.identities
            .get(&id)
            .copied()
            .ok_or(CtpError::UnknownIdentity(id))
    }

    // ========================================================================
    // Opening
    // ========================================================================

    /// Connect to `peer`, resolving it through CRP
    pub fn new_connection_out(
        &mut self,
        identity: IdentityId,
        local: LogicalAddress,
        peer: LogicalAddress,
        resolver: &mut dyn Resolve,
    ) -> Result<Cid> {
        let identity = self.identity(identity)?;
        check_addresses(&local, &peer)?;
        let path = match resolver.resolve(&peer)? {
            Resolution::Resolved(remote) => Some(Path::Udp {
                local_port: identity.port,
                remote,
            }),
            Resolution::Pending => None,
        };
        self.open(Some(identity.id), local, peer, path)
    }

    /// Connect to a peer at a known address, skipping resolution
    pub fn new_connection_to_ip(
        &mut self,
        identity: IdentityId,
        local: LogicalAddress,
        peer: LogicalAddress,
        remote: SocketAddr,
    ) -> Result<Cid> {
        let identity = self.identity(identity)?;
        check_addresses(&local, &peer)?;
        let path = Path::Udp {
            local_port: identity.port,
            remote,
        };
        self.open(Some(identity.id), local, peer, Some(path))
    }

    pub fn new_connection_to_ip6(
        &mut self,
        identity: IdentityId,
        local: LogicalAddress,
        peer: LogicalAddress,
        remote: SocketAddrV6,
    ) -> Result<Cid> {
        self.new_connection_to_ip(identity, local, peer, SocketAddr::V6(remote))
    }

    /// Connect over a tap; packets come out as [`Transmit::Tap`]
    pub fn new_connection_on_tap(
        &mut self,
        tap: TapId,
        local: LogicalAddress,
        peer: LogicalAddress,
    ) -> Result<Cid> {
        if !self.taps.contains_key(&tap) {
            return Err(CtpError::UnknownTap(tap));
        }
        check_addresses(&local, &peer)?;
        self.open(None, local, peer, Some(Path::Tap(tap)))
    }

    fn open(
        &mut self,
        identity: Option<IdentityId>,
        local: LogicalAddress,
        peer: LogicalAddress,
        path: Option<Path>,
    ) -> Result<Cid> {
        let cid = self.allocate()?;
        let mut conn = Connection::new(cid, local, peer, self.config.window);
        conn.identity = identity;
        conn.path = path;
        if path.is_some() {
            conn.state = ConnectionState::Open;
        }
        info!("{}: {} -> {} ({:?})", cid, local, peer, conn.state);
        self.connections.insert(cid, conn);
        Ok(cid)
    }

    fn allocate(&mut self) -> Result<Cid> {
        if self.connections.len() >= self.config.max_connections {
            return Err(CtpError::TooManyConnections);
        }
        self.next_cid = self.next_cid.wrapping_add(1).max(1);
        Ok(Cid(self.next_cid))
    }

    /// Move connections waiting on resolution forward
    pub fn drive_connecting(&mut self, resolver: &mut dyn Resolve) {
        let waiting: Vec<Cid> = self
            .connections
            .values()
            .filter(|conn| conn.state == ConnectionState::Connecting)
            .map(|conn| conn.cid)
            .collect();

        for cid in waiting {
            let Some(conn) = self.connections.get(&cid) else {
                continue;
            };
            let peer = conn.peer;
            let port = conn
                .identity
                .and_then(|id| self.identities.get(&id))
                .map(|identity| identity.port);

            let status = match resolver.status(&peer) {
                // Entry expired or was invalidated: ask again
                ResolveStatus::Unknown => match resolver.resolve(&peer) {
                    Ok(Resolution::Resolved(addr)) => ResolveStatus::Resolved(addr),
                    Ok(Resolution::Pending) => ResolveStatus::Pending,
                    Err(e) => {
                        debug!("{}: resolve {} failed: {}", cid, peer, e);
                        ResolveStatus::Failed
                    }
                },
                status => status,
            };

            let linger_until = self.now + self.config.linger_ticks;
            let Some(conn) = self.connections.get_mut(&cid) else {
                continue;
            };
            match (status, port) {
                (ResolveStatus::Resolved(remote), Some(local_port)) => {
                    debug!("{}: {} resolved to {}", cid, peer, remote);
                    conn.path = Some(Path::Udp { local_port, remote });
                    conn.state = ConnectionState::Open;
                    conn.flush(self.now, self.config.retransmit_ticks, &mut self.transmits);
                }
                (ResolveStatus::Failed, _) | (ResolveStatus::Resolved(_), None) => {
                    warn!("{}: could not resolve {}", cid, peer);
                    conn.finish(CloseCause::Unresolved, linger_until, &mut self.events);
                }
                _ => {}
            }
        }
    }

    // ========================================================================
    // Data
    // ========================================================================

    /// Queue one message for reliable, ordered delivery
    pub fn write(&mut self, cid: Cid, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        if data.len() > self.config.max_payload {
            return Err(CtpError::PayloadTooLarge(data.len()));
        }
        let conn = self
            .connections
            .get_mut(&cid)
            .filter(|conn| conn.is_writable())
            .ok_or(CtpError::Conn(cid))?;
        let seq = conn.send.push(Segment::Data(data));
        trace!("{}: queued seq {}", cid, seq);
        conn.flush(self.now, self.config.retransmit_ticks, &mut self.transmits);
        Ok(())
    }

    /// Next in-order message. `Ok(None)` means nothing yet; closed
    /// connections keep returning data until drained, then fail.
    pub fn read(&mut self, cid: Cid) -> Result<Option<Bytes>> {
        let conn = self.connections.get_mut(&cid).ok_or(CtpError::Conn(cid))?;
        if let Some(data) = conn.delivered.pop_front() {
            return Ok(Some(data));
        }
        if conn.is_writable() {
            Ok(None)
        } else {
            Err(CtpError::Conn(cid))
        }
    }

    /// Fire-and-forget datagram from an identity
    pub fn write_broadcast(
        &mut self,
        identity: IdentityId,
        ip: IpAddr,
        port: u16,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        let identity = self.identity(identity)?;
        let data = data.into();
        if data.len() > self.config.max_payload {
            return Err(CtpError::PayloadTooLarge(data.len()));
        }
        let mut packet = CtpPacket::new(
            PacketKind::Broadcast,
            identity.address,
            LogicalAddress::UNASSIGNED,
        );
        packet.payload = data;
        self.transmits.push_back(Transmit::Udp {
            local_port: identity.port,
            destination: SocketAddr::new(ip, port),
            payload: packet.encode(),
        });
        Ok(())
    }

    pub fn read_broadcast(&mut self) -> Option<Broadcast> {
        self.broadcasts.pop_front()
    }

    // ========================================================================
    // Closing
    // ========================================================================

    /// Graceful close: the FIN follows any queued data
    pub fn close(&mut self, cid: Cid) -> Result<()> {
        let linger_until = self.now + self.config.linger_ticks;
        let conn = self
            .connections
            .get_mut(&cid)
            .filter(|conn| conn.is_writable())
            .ok_or(CtpError::Conn(cid))?;

        if conn.path.is_none() {
            // Nothing was ever sent
            conn.finish(CloseCause::Local, linger_until, &mut self.events);
            return Ok(());
        }
        conn.send.push(Segment::Fin);
        conn.state = ConnectionState::Closing;
        debug!("{}: closing", cid);
        conn.flush(self.now, self.config.retransmit_ticks, &mut self.transmits);
        Ok(())
    }

    /// Reset the peer and free the slot now. Works on closing connections;
    /// fails on closed ones.
    pub fn close_forced(&mut self, cid: Cid) -> Result<()> {
        match self.connections.get(&cid) {
            Some(conn) if !conn.is_closed() => {
                self.kill(cid, CloseCause::Local);
                Ok(())
            }
            _ => Err(CtpError::Conn(cid)),
        }
    }

    fn kill(&mut self, cid: Cid, cause: CloseCause) {
        if let Some(conn) = self.connections.get_mut(&cid) {
            if !conn.is_closed() {
                conn.send_reset(&mut self.transmits);
                conn.finish(cause, self.now, &mut self.events);
            }
        }
        self.free(cid);
    }

    fn free(&mut self, cid: Cid) {
        if let Some(conn) = self.connections.remove(&cid) {
            if let Some(key) = conn.incoming {
                self.incoming.remove(&key);
            }
            trace!("{}: freed", cid);
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn state(&self, cid: Cid) -> Option<ConnectionState> {
        self.connections.get(&cid).map(|conn| conn.state)
    }

    pub fn info(&self, cid: Cid) -> Option<ConnectionInfo> {
        self.connections.get(&cid).map(Connection::info)
    }

    /// Every connection still holding a slot, lingering ones included
    pub fn connections(&self) -> impl Iterator<Item = Cid> + '_ {
        self.connections.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Advance retransmission and linger clocks
    pub fn timer(&mut self, ticks: u64) {
        self.now += ticks;
        let now = self.now;
        let linger_until = now + self.config.linger_ticks;

        let mut expired = Vec::new();
        for conn in self.connections.values_mut() {
            if conn.is_closed() {
                if conn.linger_until <= now {
                    expired.push(conn.cid);
                }
                continue;
            }
            if conn.path.is_none() {
                continue;
            }
            if conn.send.exhausted(now, self.config.max_retries) {
                warn!(
                    "{}: no acknowledgement from {} after {} retries",
                    conn.cid, conn.peer, self.config.max_retries
                );
                conn.send_reset(&mut self.transmits);
                conn.finish(CloseCause::Timeout, linger_until, &mut self.events);
                continue;
            }
            conn.flush(now, self.config.retransmit_ticks, &mut self.transmits);
        }

        for cid in expired {
            self.free(cid);
        }
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Packet received on the identity socket bound to `local_port`
    pub fn handle_datagram(&mut self, local_port: u16, from: SocketAddr, bytes: &[u8]) {
        let packet = match CtpPacket::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                trace!("CTP: dropped datagram from {}: {}", from, e);
                return;
            }
        };
        let path = Path::Udp {
            local_port,
            remote: from,
        };
        self.handle_packet(path, packet);
    }

    /// Packet received through a tap
    pub fn handle_tap(&mut self, tap: TapId, bytes: &[u8]) {
        if !self.taps.contains_key(&tap) {
            trace!("CTP: input on unknown tap {:?}", tap);
            return;
        }
        match CtpPacket::decode(bytes) {
            Ok(packet) => self.handle_packet(Path::Tap(tap), packet),
            Err(e) => trace!("CTP: dropped tap packet: {}", e),
        }
    }

    fn handle_packet(&mut self, path: Path, packet: CtpPacket) {
        if packet.kind == PacketKind::Broadcast {
            self.handle_broadcast(path, packet);
            return;
        }

        let cid = match self.lookup(&path, &packet) {
            Some(cid) => cid,
            None if packet.dst_conn == 0 && packet.kind.is_sequenced() => {
                match self.accept(path, &packet) {
                    Some(cid) => cid,
                    None => return,
                }
            }
            None => {
                if packet.kind.is_sequenced() {
                    self.reject(path, &packet);
                }
                return;
            }
        };

        let now = self.now;
        let linger_until = now + self.config.linger_ticks;
        let Some(conn) = self.connections.get_mut(&cid) else {
            return;
        };

        if conn.peer_conn == 0 && packet.src_conn != 0 {
            conn.peer_conn = packet.src_conn;
            conn.peer = packet.src;
        }
        if let (Some(Path::Udp { remote, .. }), Path::Udp { remote: from, .. }) =
            (&mut conn.path, path)
        {
            // Follow the peer if its NAT mapping moved
            if *remote != from {
                debug!("{}: peer moved {} -> {}", cid, remote, from);
                *remote = from;
            }
        }

        match packet.kind {
            PacketKind::Data | PacketKind::Fin => {
                conn.ack_due = true;
                if conn.is_closed() {
                    // Lingering: just re-acknowledge
                } else {
                    let segment = match packet.kind {
                        PacketKind::Fin => Segment::Fin,
                        _ => Segment::Data(packet.payload),
                    };
                    match conn.recv.on_segment(packet.seq, segment) {
                        Accept::New => {}
                        Accept::Duplicate => conn.stats.duplicates += 1,
                        Accept::OutOfWindow => {
                            trace!("{}: seq {} outside window", cid, packet.seq)
                        }
                    }

                    let mut readable = false;
                    let mut fin = false;
                    while let Some(segment) = conn.recv.pop() {
                        match segment {
                            Segment::Data(data) => {
                                conn.delivered.push_back(data);
                                conn.stats.delivered += 1;
                                readable = true;
                            }
                            Segment::Fin => {
                                fin = true;
                                break;
                            }
                        }
                    }
                    if readable {
                        self.events.push_back(TransportEvent::Readable { cid });
                    }
                    if fin {
                        conn.finish(CloseCause::PeerClosed, linger_until, &mut self.events);
                    }
                }
            }
            PacketKind::Ack => {
                if conn.is_closed() {
                    return;
                }
                let acked = conn.send.on_ack(packet.ack, packet.sack);
                if conn.state == ConnectionState::Closing && conn.send.is_empty() {
                    conn.finish(CloseCause::Local, linger_until, &mut self.events);
                } else if acked > 0 {
                    conn.flush(now, self.config.retransmit_ticks, &mut self.transmits);
                }
            }
            PacketKind::Reset => {
                debug!("{}: reset by {}", cid, conn.peer);
                conn.finish(CloseCause::Reset, linger_until, &mut self.events);
            }
            PacketKind::Broadcast => {}
        }

        if conn.ack_due {
            conn.send_ack(&mut self.transmits);
        }
    }

    fn lookup(&self, path: &Path, packet: &CtpPacket) -> Option<Cid> {
        if packet.dst_conn != 0 {
            let cid = Cid(packet.dst_conn);
            let conn = self.connections.get(&cid)?;
            return conn.peer.main_eq(&packet.src).then_some(cid);
        }
        self.incoming
            .get(&(path.via(), packet.src, packet.src_conn))
            .copied()
    }

    /// Open an incoming connection for the first packet from a peer
    fn accept(&mut self, path: Path, packet: &CtpPacket) -> Option<Cid> {
        if packet.src_conn == 0 || packet.src.is_unassigned() || !packet.src.is_valid() {
            return None;
        }
        let (identity, local) = match path {
            Path::Udp { local_port, .. } => {
                let identity = self.identities.values().find(|identity| {
                    identity.port == local_port && accepts(&identity.address, &packet.dst)
                })?;
                let local = if packet.dst.is_broadcast() {
                    identity.address
                } else {
                    packet.dst
                };
                (Some(identity.id), local)
            }
            Path::Tap(tap) => {
                let addresses = self.taps.get(&tap)?;
                if !addresses.is_empty() && !addresses.iter().any(|a| accepts(a, &packet.dst)) {
                    trace!("CTP: tap {:?} does not carry {}", tap, packet.dst);
                    return None;
                }
                (None, packet.dst)
            }
        };

        let cid = match self.allocate() {
            Ok(cid) => cid,
            Err(e) => {
                warn!("CTP: refusing connection from {}: {}", packet.src, e);
                return None;
            }
        };
        let mut conn = Connection::new(cid, local, packet.src, self.config.window);
        conn.identity = identity;
        conn.path = Some(path);
        conn.peer_conn = packet.src_conn;
        let key = (path.via(), packet.src, packet.src_conn);
        conn.incoming = Some(key);
        conn.state = ConnectionState::Open;

        info!("{}: incoming {} -> {}", cid, packet.src, local);
        self.incoming.insert(key, cid);
        self.connections.insert(cid, conn);
        self.events.push_back(TransportEvent::Incoming { cid });
        Some(cid)
    }

    /// Answer a packet for a connection we do not have
    fn reject(&mut self, path: Path, packet: &CtpPacket) {
        if packet.src_conn == 0 {
            return;
        }
        trace!(
            "CTP: no connection {} for {}, resetting",
            packet.dst_conn,
            packet.src
        );
        let mut reset = CtpPacket::new(PacketKind::Reset, packet.dst, packet.src);
        reset.dst_conn = packet.src_conn;
        self.transmits.push_back(Transmit::new(path, reset.encode()));
    }

    fn handle_broadcast(&mut self, path: Path, packet: CtpPacket) {
        if let Path::Udp { local_port, .. } = path {
            if !self.identities.values().any(|identity| identity.port == local_port) {
                return;
            }
        }
        if self.broadcasts.len() >= MAX_BROADCASTS {
            warn!("CTP: broadcast queue full, dropping oldest");
            self.broadcasts.pop_front();
        }
        self.broadcasts.push_back(Broadcast {
            source: packet.src,
            path,
            payload: packet.payload,
        });
    }

    // ========================================================================
    // Output
    // ========================================================================

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}

fn check_addresses(local: &LogicalAddress, peer: &LogicalAddress) -> Result<()> {
    for address in [local, peer] {
        if !address.is_valid() || address.is_unassigned() {
            return Err(CtpError::InvalidAddress(*address));
        }
    }
    Ok(())
}

/// An address owned locally receives `dst`
fn accepts(own: &LogicalAddress, dst: &LogicalAddress) -> bool {
    own.matches(dst) || (own.sub() == SUB_NONE && own.main_eq(dst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(s: &str) -> LogicalAddress {
        LogicalAddress::parse(s).unwrap()
    }

    /// Resolves nothing
    struct Nowhere;

    impl Resolve for Nowhere {
        fn resolve(&mut self, _: &LogicalAddress) -> vip_crp::Result<Resolution> {
            Ok(Resolution::Pending)
        }

        fn status(&self, _: &LogicalAddress) -> ResolveStatus {
            ResolveStatus::Failed
        }
    }

    fn transport_with_identity() -> (Transport, IdentityId) {
        let mut resolver = vip_crp::Resolver::new(Default::default());
        let registration = resolver
            .register_identity(
                addr("456:1"),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(255, 255, 255, 0),
                24101,
            )
            .unwrap();
        let identity = *resolver.identity(registration.id).unwrap();
        let mut transport = Transport::new(CtpConfig::default());
        transport.add_identity(identity);
        (transport, identity.id)
    }

    #[test]
    fn test_unresolved_peer_closes() {
        let (mut transport, id) = transport_with_identity();
        let cid = transport
            .new_connection_out(id, addr("456:1"), addr("123"), &mut Nowhere)
            .unwrap();
        assert_eq!(transport.state(cid), Some(ConnectionState::Connecting));

        transport.write(cid, Bytes::from_static(b"queued")).unwrap();
        assert!(transport.poll_transmit().is_none());

        transport.drive_connecting(&mut Nowhere);
        assert_eq!(
            transport.poll_event(),
            Some(TransportEvent::Closed {
                cid,
                cause: CloseCause::Unresolved
            })
        );
        assert_eq!(transport.write(cid, Bytes::new()), Err(CtpError::Conn(cid)));
    }

    #[test]
    fn test_cids_not_reused() {
        let (mut transport, id) = transport_with_identity();
        let remote: SocketAddr = "10.0.0.1:24101".parse().unwrap();
        let first = transport
            .new_connection_to_ip(id, addr("456:1"), addr("123"), remote)
            .unwrap();
        transport.close_forced(first).unwrap();
        let second = transport
            .new_connection_to_ip(id, addr("456:1"), addr("123"), remote)
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(transport.read(first), Err(CtpError::Conn(first)));
    }

    #[test]
    fn test_oversized_write() {
        let (mut transport, id) = transport_with_identity();
        let cid = transport
            .new_connection_to_ip(id, addr("456:1"), addr("123"), "10.0.0.1:24101".parse().unwrap())
            .unwrap();
        let big = vec![0u8; transport.config().max_payload + 1];
        assert!(matches!(
            transport.write(cid, big),
            Err(CtpError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_stray_data_is_reset() {
        let (mut transport, _) = transport_with_identity();
        let mut stray = CtpPacket::new(PacketKind::Data, addr("123"), addr("456:1"));
        stray.src_conn = 9;
        stray.dst_conn = 77;
        stray.seq = 3;
        let from: SocketAddr = "10.0.0.1:24101".parse().unwrap();
        transport.handle_datagram(24101, from, &stray.encode());

        let Some(Transmit::Udp {
            destination,
            payload,
            ..
        }) = transport.poll_transmit()
        else {
            panic!("expected a reset");
        };
        assert_eq!(destination, from);
        let reset = CtpPacket::decode(&payload).unwrap();
        assert_eq!(reset.kind, PacketKind::Reset);
        assert_eq!(reset.dst_conn, 9);
        assert!(transport.is_empty());
    }

    #[test]
    fn test_rebound_peer_keeps_one_connection() {
        let (mut transport, _) = transport_with_identity();
        let first: SocketAddr = "10.0.0.1:24101".parse().unwrap();
        let moved: SocketAddr = "10.0.0.1:40000".parse().unwrap();
        for (seq, from) in [(1, first), (2, moved)] {
            let mut data = CtpPacket::new(PacketKind::Data, addr("123"), addr("456:1"));
            data.src_conn = 5;
            data.seq = seq;
            data.payload = Bytes::from_static(b"x");
            transport.handle_datagram(24101, from, &data.encode());
        }
        assert_eq!(transport.len(), 1);
        let cid = transport.connections().next().unwrap();
        assert_eq!(
            transport.info(cid).unwrap().path,
            Some(Path::Udp {
                local_port: 24101,
                remote: moved
            })
        );

        transport.close_forced(cid).unwrap();
        assert!(transport.is_empty());
        assert!(transport.incoming.is_empty());
    }

    #[test]
    fn test_unknown_destination_ignored() {
        let (mut transport, _) = transport_with_identity();
        let mut first = CtpPacket::new(PacketKind::Data, addr("123"), addr("789"));
        first.src_conn = 1;
        first.seq = 1;
        transport.handle_datagram(24101, "10.0.0.1:24101".parse().unwrap(), &first.encode());
        assert!(transport.is_empty());
        assert!(transport.poll_event().is_none());
    }
}

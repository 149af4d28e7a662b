//! The stack context
//!
//! ```text
//!                 ┌───────────────── Stack ─────────────────┐
//!   send_csp ───► │  Call trackers ──► Transport (CTP) ─┐   │
//!   read_csp ◄─── │                                     ├──►│ sockets (one per port)
//!                 │               Resolver (CRP) ───────┘   │ tap sinks
//!                 └─────────────────────────────────────────┘
//! ```
//!
//! Nothing here blocks or spawns. The owner calls [`Stack::run`] whenever
//! sockets may be readable, [`Stack::timer`] every CTP tick and
//! [`Stack::crp_timer`] every CRP tick, all from one thread.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::{debug, info, trace, warn};
use vip_core::csp::{self, Message};
use vip_core::{Call, CallState, LogicalAddress};
use vip_crp::{IdentityId, Resolution, ResolveStatus, Resolver, ResolverEvent};
use vip_ctp::{Broadcast, Cid, ConnectionInfo, ConnectionState, TapId, Transport, TransportEvent};
use vip_transport::{DatagramSocket, Network, MAX_DATAGRAM_SIZE};

use crate::config::StackConfig;
use crate::{Result, StackError};

/// Something the owner should look at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent {
    Transport(TransportEvent),
    Resolver(ResolverEvent),
}

type TapSink = Box<dyn FnMut(Bytes) + Send>;

pub struct Stack<N: Network> {
    network: N,
    config: StackConfig,
    sockets: BTreeMap<u16, N::Socket>,
    resolver: Resolver,
    transport: Transport,
    taps: HashMap<TapId, TapSink>,
    calls: HashMap<Cid, Call>,
    events: VecDeque<StackEvent>,
    buf: Vec<u8>,
}

impl<N: Network> Stack<N> {
    pub fn new(network: N, config: StackConfig) -> Self {
        let resolver = Resolver::new(config.crp.clone());
        let transport = Transport::new(config.ctp.clone());
        Self {
            network,
            config,
            sockets: BTreeMap::new(),
            resolver,
            transport,
            taps: HashMap::new(),
            calls: HashMap::new(),
            events: VecDeque::new(),
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Build a stack and register the identities listed in `config`
    pub fn from_config(network: N, config: StackConfig) -> Result<Self> {
        let identities = config.identities.clone();
        let mut stack = Self::new(network, config);
        for identity in identities {
            stack.register_identity(identity.address, identity.ip, identity.netmask, identity.port)?;
        }
        Ok(stack)
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Ports with an open socket
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.sockets.keys().copied()
    }

    // ========================================================================
    // Identities
    // ========================================================================

    /// Register a local identity, opening the port's socket if it is the
    /// first one there
    pub fn register_identity(
        &mut self,
        address: LogicalAddress,
        ip: Ipv4Addr,
        netmask: Ipv4Addr,
        port: u16,
    ) -> Result<IdentityId> {
        if port == 0 {
            return Err(StackError::InvalidPort(port));
        }
        let registration = self.resolver.register_identity(address, ip, netmask, port)?;
        if registration.port_opened {
            let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
            match self.network.bind(bind) {
                Ok(socket) => {
                    debug!("opened socket on port {}", port);
                    self.sockets.insert(port, socket);
                }
                Err(e) => {
                    if let Err(undo) = self.resolver.remove_identity(registration.id) {
                        warn!("could not undo registration {}: {}", registration.id, undo);
                    }
                    return Err(e.into());
                }
            }
        }
        if let Some(identity) = self.resolver.identity(registration.id) {
            self.transport.add_identity(*identity);
        }
        Ok(registration.id)
    }

    /// Remove an identity. Its connections are reset and returned; the
    /// port's socket closes with its last identity.
    pub fn remove_identity(&mut self, id: IdentityId) -> Result<Vec<Cid>> {
        if self.resolver.identity(id).is_none() {
            return Err(vip_crp::CrpError::UnknownIdentity(id).into());
        }
        let closed = self.transport.remove_identity(id);
        for cid in &closed {
            self.calls.remove(cid);
        }
        // The resets leave before the socket might go
        self.flush();
        self.collect_events();

        let removal = self.resolver.remove_identity(id)?;
        if removal.port_closed {
            self.sockets.remove(&removal.identity.port);
            debug!("closed socket on port {}", removal.identity.port);
        }
        info!(
            "identity {} removed, {} connection(s) closed",
            removal.identity.address,
            closed.len()
        );
        Ok(closed)
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    pub fn resolve(&mut self, address: &LogicalAddress) -> Result<Resolution> {
        let resolution = self.resolver.resolve(address)?;
        self.flush();
        Ok(resolution)
    }

    pub fn is_resolved(&self, address: &LogicalAddress) -> ResolveStatus {
        self.resolver.is_resolved(address)
    }

    pub fn invalidate(&mut self, address: &LogicalAddress) -> bool {
        self.resolver.invalidate(address)
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Open a connection from `identity` to `peer`, resolving it first
    pub fn connect(&mut self, identity: IdentityId, peer: LogicalAddress) -> Result<Cid> {
        let local = self.local_address(identity)?;
        let cid = self
            .transport
            .new_connection_out(identity, local, peer, &mut self.resolver)?;
        self.flush();
        Ok(cid)
    }

    /// Open a connection to a peer at a known address
    pub fn connect_to_ip(
        &mut self,
        identity: IdentityId,
        peer: LogicalAddress,
        remote: SocketAddr,
    ) -> Result<Cid> {
        let local = self.local_address(identity)?;
        Ok(self.transport.new_connection_to_ip(identity, local, peer, remote)?)
    }

    /// Open a connection over a tap
    pub fn connect_on_tap(
        &mut self,
        tap: TapId,
        local: LogicalAddress,
        peer: LogicalAddress,
    ) -> Result<Cid> {
        Ok(self.transport.new_connection_on_tap(tap, local, peer)?)
    }

    fn local_address(&self, identity: IdentityId) -> Result<LogicalAddress> {
        self.resolver
            .identity(identity)
            .map(|identity| identity.address)
            .ok_or_else(|| vip_crp::CrpError::UnknownIdentity(identity).into())
    }

    pub fn write(&mut self, cid: Cid, data: impl Into<Bytes>) -> Result<()> {
        self.transport.write(cid, data)?;
        self.flush();
        Ok(())
    }

    pub fn read(&mut self, cid: Cid) -> Result<Option<Bytes>> {
        Ok(self.transport.read(cid)?)
    }

    pub fn close(&mut self, cid: Cid) -> Result<()> {
        self.transport.close(cid)?;
        self.flush();
        Ok(())
    }

    pub fn close_forced(&mut self, cid: Cid) -> Result<()> {
        self.transport.close_forced(cid)?;
        self.calls.remove(&cid);
        self.flush();
        self.collect_events();
        Ok(())
    }

    pub fn state(&self, cid: Cid) -> Option<ConnectionState> {
        self.transport.state(cid)
    }

    pub fn info(&self, cid: Cid) -> Option<ConnectionInfo> {
        self.transport.info(cid)
    }

    pub fn write_broadcast(
        &mut self,
        identity: IdentityId,
        ip: IpAddr,
        port: u16,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        self.transport.write_broadcast(identity, ip, port, data)?;
        self.flush();
        Ok(())
    }

    pub fn read_broadcast(&mut self) -> Option<Broadcast> {
        self.transport.read_broadcast()
    }

    // ========================================================================
    // Signalling
    // ========================================================================

    /// Encode and send one CSP record, tracking call progress
    pub fn send_csp(&mut self, cid: Cid, message: &Message) -> Result<()> {
        let record = csp::encode(message)?;
        self.transport.write(cid, record)?;
        let call = self.calls.entry(cid).or_default();
        if !call.on_sent(message) {
            debug!("{}: {} sent outside call flow", cid, message.message_type().name());
        }
        self.flush();
        Ok(())
    }

    /// Next well-formed CSP record. Malformed records are skipped.
    pub fn read_csp(&mut self, cid: Cid) -> Result<Option<Message>> {
        while let Some(record) = self.transport.read(cid)? {
            let Some(message) = csp::parse(&record) else {
                trace!("{}: discarded malformed CSP record ({} bytes)", cid, record.len());
                continue;
            };
            let call = self.calls.entry(cid).or_default();
            if !call.on_received(&message) {
                debug!(
                    "{}: {} received outside call flow",
                    cid,
                    message.message_type().name()
                );
            }
            return Ok(Some(message));
        }
        Ok(None)
    }

    pub fn call_state(&self, cid: Cid) -> Option<CallState> {
        self.calls.get(&cid).map(Call::state)
    }

    pub fn call(&self, cid: Cid) -> Option<&Call> {
        self.calls.get(&cid)
    }

    // ========================================================================
    // Taps
    // ========================================================================

    /// Register a tap carrying `addresses` (all when empty). Packets for it
    /// are handed to `sink`.
    pub fn add_tap(
        &mut self,
        addresses: Vec<LogicalAddress>,
        sink: impl FnMut(Bytes) + Send + 'static,
    ) -> TapId {
        let tap = self.transport.add_tap(addresses);
        self.taps.insert(tap, Box::new(sink));
        tap
    }

    pub fn remove_tap(&mut self, tap: TapId) -> Vec<Cid> {
        let closed = self.transport.remove_tap(tap);
        // Resets still go out through the sink
        self.flush();
        self.taps.remove(&tap);
        self.collect_events();
        closed
    }

    /// Packet received from a tap
    pub fn tap_input(&mut self, tap: TapId, bytes: &[u8]) {
        self.transport.handle_tap(tap, bytes);
        self.flush();
        self.collect_events();
    }

    // ========================================================================
    // Driving
    // ========================================================================

    /// Process everything queued on the sockets. Returns the number of
    /// datagrams read.
    pub fn run(&mut self) -> usize {
        let mut received = 0;
        for (&port, socket) in &self.sockets {
            loop {
                let (n, from) = match socket.try_recv_from(&mut self.buf) {
                    Ok(Some(datagram)) => datagram,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("receive on port {} failed: {}", port, e);
                        break;
                    }
                };
                received += 1;
                let datagram = &self.buf[..n];
                match datagram.first() {
                    Some(&vip_crp::packet::MAGIC) => {
                        self.resolver.handle_datagram(port, from, datagram)
                    }
                    Some(&vip_ctp::packet::MAGIC) => {
                        self.transport.handle_datagram(port, from, datagram)
                    }
                    _ => trace!("discarded {} byte datagram from {}", n, from),
                }
            }
        }
        self.transport.drive_connecting(&mut self.resolver);
        self.flush();
        self.collect_events();
        received
    }

    /// Advance the CTP clock (nominally 100 ms per tick)
    pub fn timer(&mut self, ticks: u64) {
        self.transport.timer(ticks);
        self.flush();
        self.collect_events();
        let transport = &self.transport;
        self.calls.retain(|cid, _| transport.state(*cid).is_some());
    }

    /// Advance the CRP clock (nominally one second per tick)
    pub fn crp_timer(&mut self, ticks: u64) {
        self.resolver.timer(ticks);
        self.transport.drive_connecting(&mut self.resolver);
        self.flush();
        self.collect_events();
    }

    pub fn poll_event(&mut self) -> Option<StackEvent> {
        self.events.pop_front()
    }

    fn collect_events(&mut self) {
        while let Some(event) = self.resolver.poll_event() {
            self.events.push_back(StackEvent::Resolver(event));
        }
        while let Some(event) = self.transport.poll_event() {
            self.events.push_back(StackEvent::Transport(event));
        }
    }

    fn flush(&mut self) {
        while let Some(transmit) = self.resolver.poll_transmit() {
            self.send_udp(transmit.local_port, transmit.destination, &transmit.payload);
        }
        while let Some(transmit) = self.transport.poll_transmit() {
            match transmit {
                vip_ctp::Transmit::Udp {
                    local_port,
                    destination,
                    payload,
                } => self.send_udp(local_port, destination, &payload),
                vip_ctp::Transmit::Tap { tap, payload } => match self.taps.get_mut(&tap) {
                    Some(sink) => sink(payload),
                    None => trace!("no sink for tap {:?}", tap),
                },
            }
        }
    }

    fn send_udp(&self, port: u16, destination: SocketAddr, payload: &[u8]) {
        let Some(socket) = self.sockets.get(&port) else {
            warn!("no socket on port {} for {}", port, destination);
            return;
        };
        if let Err(e) = socket.send_to(payload, destination) {
            debug!("send to {} failed: {}", destination, e);
        }
    }
}

impl<N: Network> std::fmt::Debug for Stack<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("ports", &self.sockets.keys().collect::<Vec<_>>())
            .field("connections", &self.transport.len())
            .field("calls", &self.calls.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vip_transport::MemoryNetwork;

    const MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

    fn addr(s: &str) -> LogicalAddress {
        LogicalAddress::parse(s).unwrap()
    }

    #[test]
    fn test_socket_shared_per_port() {
        let net = MemoryNetwork::new();
        let mut stack = Stack::new(net.host(Ipv4Addr::new(10, 0, 0, 1)), StackConfig::default());
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let a = stack.register_identity(addr("100"), ip, MASK, 24101).unwrap();
        let b = stack.register_identity(addr("200"), ip, MASK, 24101).unwrap();
        stack.register_identity(addr("300"), ip, MASK, 24102).unwrap();
        assert_eq!(stack.ports().collect::<Vec<_>>(), vec![24101, 24102]);

        stack.remove_identity(a).unwrap();
        assert_eq!(stack.ports().count(), 2);
        stack.remove_identity(b).unwrap();
        assert_eq!(stack.ports().collect::<Vec<_>>(), vec![24102]);
        assert!(stack.remove_identity(b).is_err());
    }

    #[test]
    fn test_port_zero_refused() {
        let net = MemoryNetwork::new();
        let mut stack = Stack::new(net.host(Ipv4Addr::new(10, 0, 0, 1)), StackConfig::default());
        assert!(matches!(
            stack.register_identity(addr("100"), Ipv4Addr::new(10, 0, 0, 1), MASK, 0),
            Err(StackError::InvalidPort(0))
        ));
    }

    #[test]
    fn test_bind_failure_rolls_back() {
        let net = MemoryNetwork::new();
        let host = net.host(Ipv4Addr::new(10, 0, 0, 1));
        let _taken = host
            .bind(SocketAddr::from((Ipv4Addr::new(10, 0, 0, 1), 24101)))
            .unwrap();
        let mut stack = Stack::new(host, StackConfig::default());
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        assert!(stack.register_identity(addr("100"), ip, MASK, 24101).is_err());
        assert_eq!(stack.resolver().identities().count(), 0);
    }

    #[test]
    fn test_tap_sink_receives_packets() {
        let net = MemoryNetwork::new();
        let mut stack = Stack::new(net.host(Ipv4Addr::new(10, 0, 0, 1)), StackConfig::default());
        let out = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = out.clone();
        let tap = stack.add_tap(vec![], move |bytes| sink.lock().push(bytes));

        let cid = stack.connect_on_tap(tap, addr("100"), addr("200")).unwrap();
        stack.write(cid, &b"hello"[..]).unwrap();
        assert_eq!(out.lock().len(), 1);
        assert_eq!(out.lock()[0][0], vip_ctp::packet::MAGIC);
    }
}

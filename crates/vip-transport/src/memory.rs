//! In-process datagram network
//!
//! Every [`MemoryHost`] is one IPv4 address on a shared hub. Datagrams are
//! queued per bound socket address; a destination ending in `.255` reaches
//! every other socket bound on that port. Faults are injected
//! deterministically, counted over all deliveries, so tests replay exactly.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::{DatagramSocket, Network};

/// First port handed out for binds to port 0
const EPHEMERAL_PORT_BASE: u16 = 49152;

/// Deterministic fault injection; `0` disables a fault
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultConfig {
    /// Drop every Nth delivery
    pub drop_every: u32,
    /// Deliver every Nth datagram twice
    pub duplicate_every: u32,
    /// Queue every Nth datagram ahead of those already waiting
    pub reorder_every: u32,
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
    pub unroutable: u64,
}

#[derive(Default)]
struct Hub {
    queues: HashMap<SocketAddr, VecDeque<(Bytes, SocketAddr)>>,
    next_port: u16,
    faults: FaultConfig,
    deliveries: u64,
    stats: NetworkStats,
}

impl Hub {
    fn deliver(&mut self, to: SocketAddr, from: SocketAddr, data: Bytes) {
        self.deliveries += 1;
        let n = self.deliveries;
        let hit = |every: u32| every > 0 && n % every as u64 == 0;

        if hit(self.faults.drop_every) {
            trace!("memory net: dropped {} -> {}", from, to);
            self.stats.dropped += 1;
            return;
        }
        let duplicate = hit(self.faults.duplicate_every);
        let reorder = hit(self.faults.reorder_every);

        let Some(queue) = self.queues.get_mut(&to) else {
            self.stats.unroutable += 1;
            return;
        };
        if reorder {
            queue.push_front((data.clone(), from));
            self.stats.reordered += 1;
        } else {
            queue.push_back((data.clone(), from));
        }
        if duplicate {
            queue.push_back((data, from));
            self.stats.duplicated += 1;
        }
        self.stats.delivered += 1;
    }
}

fn is_broadcast(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_broadcast() || v4.octets()[3] == 255,
        IpAddr::V6(_) => false,
    }
}

/// Shared in-memory network
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: FaultConfig) -> Self {
        let network = Self::new();
        network.set_faults(faults);
        network
    }

    pub fn set_faults(&self, faults: FaultConfig) {
        self.hub.lock().faults = faults;
    }

    /// A host with its own address on this network
    pub fn host(&self, ip: Ipv4Addr) -> MemoryHost {
        MemoryHost {
            network: self.clone(),
            ip,
        }
    }

    pub fn stats(&self) -> NetworkStats {
        self.hub.lock().stats
    }

    /// Datagrams queued and not yet received
    pub fn in_flight(&self) -> usize {
        self.hub.lock().queues.values().map(VecDeque::len).sum()
    }
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hub = self.hub.lock();
        f.debug_struct("MemoryNetwork")
            .field("sockets", &hub.queues.len())
            .field("stats", &hub.stats)
            .finish()
    }
}

/// One host on a [`MemoryNetwork`]
#[derive(Debug, Clone)]
pub struct MemoryHost {
    network: MemoryNetwork,
    ip: Ipv4Addr,
}

impl MemoryHost {
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Network for MemoryHost {
    type Socket = MemorySocket;

    fn bind(&self, addr: SocketAddr) -> Result<MemorySocket> {
        let mut hub = self.network.hub.lock();
        let ip = if addr.ip().is_unspecified() {
            IpAddr::V4(self.ip)
        } else {
            addr.ip()
        };

        let port = if addr.port() == 0 {
            loop {
                let candidate = EPHEMERAL_PORT_BASE.wrapping_add(hub.next_port);
                hub.next_port = hub.next_port.wrapping_add(1);
                if !hub.queues.contains_key(&SocketAddr::new(ip, candidate)) {
                    break candidate;
                }
            }
        } else {
            addr.port()
        };

        let local = SocketAddr::new(ip, port);
        if hub.queues.contains_key(&local) {
            return Err(TransportError::AddrInUse(local));
        }
        hub.queues.insert(local, VecDeque::new());
        trace!("memory net: bound {}", local);

        Ok(MemorySocket {
            hub: self.network.hub.clone(),
            local,
        })
    }
}

/// Socket on a [`MemoryNetwork`]; unbinds on drop
pub struct MemorySocket {
    hub: Arc<Mutex<Hub>>,
    local: SocketAddr,
}

impl DatagramSocket for MemorySocket {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        let mut hub = self.hub.lock();
        hub.stats.sent += 1;
        let data = Bytes::copy_from_slice(buf);

        if is_broadcast(target.ip()) {
            let receivers: Vec<SocketAddr> = hub
                .queues
                .keys()
                .filter(|addr| addr.port() == target.port() && **addr != self.local)
                .copied()
                .collect();
            for to in receivers {
                hub.deliver(to, self.local, data.clone());
            }
        } else {
            hub.deliver(target, self.local, data);
        }
        Ok(buf.len())
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        let mut hub = self.hub.lock();
        let Some((data, from)) = hub.queues.get_mut(&self.local).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(Some((len, from)))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local)
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        self.hub.lock().queues.remove(&self.local);
    }
}

impl std::fmt::Debug for MemorySocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySocket").field("local", &self.local).finish()
    }
}

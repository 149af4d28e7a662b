//! Resolver state machine
//!
//! ```text
//!            resolve()                 reply
//!   (none) ───────────► Pending ─────────────────► Resolved
//!      ▲                  │  ▲ retry (backoff)        │
//!      │   hold expired   │  └──────┘                 │ ttl expired /
//!      └──── Failed ◄─────┘ max_attempts              │ invalidate()
//!      ▲                                              │
//!      └──────────────────────────────────────────────┘
//! ```
//!
//! Requests are broadcast on the subnet of every registered identity.
//! Incoming requests are answered only for local identities; replies only
//! update entries that are pending or already resolved.

use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use tracing::{debug, info, trace, warn};
use vip_core::LogicalAddress;

use crate::cache::{Cache, CacheEntry, EntryState, TtlClass};
use crate::identity::{Identity, IdentityId, IdentityTable, Registration, Removal};
use crate::packet::CrpPacket;
use crate::{CrpConfig, CrpError, Result};

/// Answer to a resolve call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved(SocketAddr),
    /// A request is outstanding; poll again later
    Pending,
}

/// Non-blocking resolution poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    Resolved(SocketAddr),
    Pending,
    /// Retry budget exhausted
    Failed,
    /// Never asked for, or the entry has been dropped
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverEvent {
    Resolved {
        address: LogicalAddress,
        addr: SocketAddr,
    },
    Failed {
        address: LogicalAddress,
    },
}

/// A datagram the owner must send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Port of the identity socket to send from
    pub local_port: u16,
    pub destination: SocketAddr,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub requests_sent: u64,
    pub replies_sent: u64,
    pub replies_received: u64,
    pub cache_hits: u64,
    pub local_hits: u64,
    pub failures: u64,
}

/// Resolution as seen by the transport
pub trait Resolve {
    fn resolve(&mut self, address: &LogicalAddress) -> Result<Resolution>;

    fn status(&self, address: &LogicalAddress) -> ResolveStatus;
}

pub struct Resolver {
    config: CrpConfig,
    identities: IdentityTable,
    cache: Cache,
    now: u64,
    next_request_id: u16,
    transmits: VecDeque<Transmit>,
    events: VecDeque<ResolverEvent>,
    stats: ResolverStats,
}

impl Resolver {
    pub fn new(config: CrpConfig) -> Self {
        Self {
            config,
            identities: IdentityTable::default(),
            cache: Cache::default(),
            now: 0,
            next_request_id: 0,
            transmits: VecDeque::new(),
            events: VecDeque::new(),
            stats: ResolverStats::default(),
        }
    }

    pub fn config(&self) -> &CrpConfig {
        &self.config
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    // ========================================================================
    // Identities
    // ========================================================================

    /// Register a local identity
    pub fn register_identity(
        &mut self,
        address: LogicalAddress,
        ip: Ipv4Addr,
        netmask: Ipv4Addr,
        port: u16,
    ) -> Result<Registration> {
        let registration = self.identities.register(address, ip, netmask, port)?;
        info!(
            "Registered identity {} as {} on {}:{}",
            registration.id, address, ip, port
        );
        // A cached mapping for a now-local address is stale
        self.cache.remove(&address);
        Ok(registration)
    }

    pub fn remove_identity(&mut self, id: IdentityId) -> Result<Removal> {
        let removal = self.identities.remove(id)?;
        info!("Removed identity {} ({})", id, removal.identity.address);
        Ok(removal)
    }

    pub fn identity(&self, id: IdentityId) -> Option<&Identity> {
        self.identities.get(id)
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.identities.iter()
    }

    /// Local identity designated by `address` (broadcast sub matches on main)
    pub fn local_identity(&self, address: &LogicalAddress) -> Option<&Identity> {
        self.identities.iter().find(|i| i.answers(address))
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Resolve with the configured default TTL class
    pub fn resolve(&mut self, address: &LogicalAddress) -> Result<Resolution> {
        self.resolve_with_ttl(address, self.config.default_ttl)
    }

    /// Resolve, caching a reply for the given TTL class
    pub fn resolve_with_ttl(
        &mut self,
        address: &LogicalAddress,
        ttl: TtlClass,
    ) -> Result<Resolution> {
        if !address.is_valid() || address.is_unassigned() {
            return Err(CrpError::InvalidAddress(*address));
        }

        if let Some(identity) = self.local_identity(address) {
            let addr = identity.socket_addr();
            self.stats.local_hits += 1;
            trace!("{} is local ({})", address, addr);
            return Ok(Resolution::Resolved(addr));
        }

        match self.cache.get(address).map(|entry| entry.state) {
            Some(EntryState::Resolved { addr, .. }) => {
                self.stats.cache_hits += 1;
                Ok(Resolution::Resolved(addr))
            }
            Some(EntryState::Pending { .. }) => Ok(Resolution::Pending),
            Some(EntryState::Failed { .. }) | None => {
                self.start_request(*address, ttl)?;
                Ok(Resolution::Pending)
            }
        }
    }

    /// Poll without starting a request
    pub fn is_resolved(&self, address: &LogicalAddress) -> ResolveStatus {
        if let Some(identity) = self.local_identity(address) {
            return ResolveStatus::Resolved(identity.socket_addr());
        }
        match self.cache.get(address).map(|entry| entry.state) {
            Some(EntryState::Resolved { addr, .. }) => ResolveStatus::Resolved(addr),
            Some(EntryState::Pending { .. }) => ResolveStatus::Pending,
            Some(EntryState::Failed { .. }) => ResolveStatus::Failed,
            None => ResolveStatus::Unknown,
        }
    }

    /// Drop one cache entry. Returns true if there was one.
    pub fn invalidate(&mut self, address: &LogicalAddress) -> bool {
        let removed = self.cache.remove(address).is_some();
        if removed {
            debug!("Invalidated {}", address);
        }
        removed
    }

    pub fn invalidate_all(&mut self) {
        debug!("Invalidated {} cache entries", self.cache.len());
        self.cache.clear();
    }

    fn start_request(&mut self, address: LogicalAddress, ttl: TtlClass) -> Result<()> {
        if self.identities.is_empty() {
            return Err(CrpError::NoIdentity);
        }
        if !self.cache.contains(&address)
            && self.cache.len() >= self.config.max_entries
            && !self.cache.evict_one()
        {
            return Err(CrpError::CacheFull);
        }

        self.next_request_id = self.next_request_id.wrapping_add(1);
        let request_id = self.next_request_id;
        let backoff = self.config.initial_retry_ticks.max(1);

        self.send_request(address, ttl, request_id);
        self.cache.insert(
            address,
            CacheEntry {
                ttl,
                state: EntryState::Pending {
                    request_id,
                    attempts: 1,
                    retry_at: self.now + backoff,
                    backoff,
                },
            },
        );
        Ok(())
    }

    fn send_request(&mut self, target: LogicalAddress, ttl: TtlClass, id: u16) {
        let payload = CrpPacket::Request { id, ttl, target }.encode();

        let mut seen = HashSet::new();
        for identity in self.identities.iter() {
            let destination = SocketAddr::V4(SocketAddrV4::new(
                identity.broadcast_ip(),
                self.config.port,
            ));
            if seen.insert((identity.port, destination)) {
                self.transmits.push_back(Transmit {
                    local_port: identity.port,
                    destination,
                    payload: payload.clone(),
                });
            }
        }
        self.stats.requests_sent += 1;
        debug!("CRP request {} for {}", id, target);
    }

    // ========================================================================
    // Timers and I/O
    // ========================================================================

    /// Advance retransmissions and expiry
    pub fn timer(&mut self, ticks: u64) {
        self.now += ticks;
        let now = self.now;
        let max_attempts = self.config.max_attempts;
        let max_retry = self.config.max_retry_ticks.max(1);
        let hold = self.config.failed_hold_ticks;

        let mut retries = Vec::new();
        let mut failures = Vec::new();

        self.cache.retain(|key, entry| match entry.state {
            EntryState::Resolved { expires_at, .. } => {
                if expires_at <= now {
                    debug!("Cache entry for {} expired", key);
                    false
                } else {
                    true
                }
            }
            EntryState::Failed { until } => until > now,
            EntryState::Pending {
                request_id,
                attempts,
                retry_at,
                backoff,
            } => {
                if retry_at > now {
                    return true;
                }
                if attempts >= max_attempts {
                    entry.state = EntryState::Failed { until: now + hold };
                    failures.push(*key);
                } else {
                    let backoff = (backoff * 2).min(max_retry);
                    entry.state = EntryState::Pending {
                        request_id,
                        attempts: attempts + 1,
                        retry_at: now + backoff,
                        backoff,
                    };
                    retries.push((*key, entry.ttl, request_id));
                }
                true
            }
        });

        for (target, ttl, id) in retries {
            trace!("Retransmitting CRP request {} for {}", id, target);
            self.send_request(target, ttl, id);
        }
        for address in failures {
            warn!("Resolution of {} failed", address);
            self.stats.failures += 1;
            self.events.push_back(ResolverEvent::Failed { address });
        }
    }

    /// Process a datagram received on an identity port
    pub fn handle_datagram(&mut self, local_port: u16, from: SocketAddr, bytes: &[u8]) {
        let packet = match CrpPacket::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                trace!("Discarding CRP datagram from {}: {}", from, e);
                return;
            }
        };

        match packet {
            CrpPacket::Request { id, ttl, target } => {
                let Some(identity) = self.identities.answering(local_port, &target).copied() else {
                    trace!("Ignoring request {} for {} from {}", id, target, from);
                    return;
                };
                let reply = CrpPacket::Reply {
                    id,
                    ttl,
                    target,
                    ip: identity.ip,
                    port: identity.port,
                };
                self.transmits.push_back(Transmit {
                    local_port,
                    destination: from,
                    payload: reply.encode(),
                });
                self.stats.replies_sent += 1;
                debug!("Answered request for {} from {}", target, from);
            }
            CrpPacket::Reply {
                target, ip, port, ..
            } => {
                let now = self.now;
                let ttl_ticks = |ttl| self.config.ttl_ticks(ttl);
                let Some(entry) = self.cache.get_mut(&target) else {
                    trace!("Unsolicited reply for {} from {}", target, from);
                    return;
                };
                let was_pending = match entry.state {
                    EntryState::Pending { .. } => true,
                    EntryState::Resolved { .. } => false,
                    EntryState::Failed { .. } => {
                        trace!("Late reply for failed {} ignored", target);
                        return;
                    }
                };

                let ip = if ip.is_unspecified() {
                    from.ip()
                } else {
                    IpAddr::V4(ip)
                };
                let addr = SocketAddr::new(ip, port);
                entry.state = EntryState::Resolved {
                    addr,
                    expires_at: now + ttl_ticks(entry.ttl),
                };
                self.stats.replies_received += 1;

                if was_pending {
                    debug!("Resolved {} -> {}", target, addr);
                    self.events.push_back(ResolverEvent::Resolved {
                        address: target,
                        addr,
                    });
                }
            }
        }
    }

    /// Next datagram to send
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<ResolverEvent> {
        self.events.pop_front()
    }
}

impl Resolve for Resolver {
    fn resolve(&mut self, address: &LogicalAddress) -> Result<Resolution> {
        Resolver::resolve(self, address)
    }

    fn status(&self, address: &LogicalAddress) -> ResolveStatus {
        self.is_resolved(address)
    }
}

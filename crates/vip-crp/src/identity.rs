//! Local identities
//!
//! An identity is a local logical address bound to an IP, netmask and UDP
//! port. Identities on the same port share one socket; the table counts
//! users per port so the owner knows when to open and close it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use vip_core::LogicalAddress;

use crate::{CrpError, Result};

/// Opaque identity handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityId(u32);

impl IdentityId {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub id: IdentityId,
    pub address: LogicalAddress,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub port: u16,
}

impl Identity {
    /// Directed broadcast address of the identity's subnet
    pub fn broadcast_ip(&self) -> Ipv4Addr {
        let ip = u32::from(self.ip);
        let mask = u32::from(self.netmask);
        Ipv4Addr::from(ip | !mask)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }

    /// True if a request for `target` should be answered by this identity
    pub fn answers(&self, target: &LogicalAddress) -> bool {
        self.address.matches(target)
    }
}

/// Result of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: IdentityId,
    /// First identity on this port: the owner must open the socket
    pub port_opened: bool,
}

/// Result of a removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    pub identity: Identity,
    /// Last identity on this port: the owner must close the socket
    pub port_closed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct IdentityTable {
    identities: BTreeMap<IdentityId, Identity>,
    ports: HashMap<u16, usize>,
    next_id: u32,
}

impl IdentityTable {
    pub fn register(
        &mut self,
        address: LogicalAddress,
        ip: Ipv4Addr,
        netmask: Ipv4Addr,
        port: u16,
    ) -> Result<Registration> {
        if !address.is_valid() || address.is_unassigned() || address.is_broadcast() {
            return Err(CrpError::InvalidAddress(address));
        }
        if self.find(&address).is_some() {
            return Err(CrpError::DuplicateIdentity(address));
        }

        self.next_id += 1;
        let id = IdentityId(self.next_id);
        self.identities.insert(
            id,
            Identity {
                id,
                address,
                ip,
                netmask,
                port,
            },
        );

        let users = self.ports.entry(port).or_insert(0);
        *users += 1;
        Ok(Registration {
            id,
            port_opened: *users == 1,
        })
    }

    pub fn remove(&mut self, id: IdentityId) -> Result<Removal> {
        let identity = self
            .identities
            .remove(&id)
            .ok_or(CrpError::UnknownIdentity(id))?;

        let mut port_closed = false;
        if let Some(users) = self.ports.get_mut(&identity.port) {
            *users -= 1;
            if *users == 0 {
                self.ports.remove(&identity.port);
                port_closed = true;
            }
        }
        Ok(Removal {
            identity,
            port_closed,
        })
    }

    pub fn get(&self, id: IdentityId) -> Option<&Identity> {
        self.identities.get(&id)
    }

    /// Identity registered with exactly this address
    pub fn find(&self, address: &LogicalAddress) -> Option<&Identity> {
        self.identities.values().find(|i| i.address == *address)
    }

    /// First identity on `port` answering for `target`
    pub fn answering(&self, port: u16, target: &LogicalAddress) -> Option<&Identity> {
        self.identities
            .values()
            .find(|i| i.port == port && i.answers(target))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> LogicalAddress {
        LogicalAddress::parse(s).unwrap()
    }

    const MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

    #[test]
    fn test_port_refcount() {
        let mut table = IdentityTable::default();
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let a = table.register(addr("123"), ip, MASK, 24101).unwrap();
        let b = table.register(addr("123:1"), ip, MASK, 24101).unwrap();
        assert!(a.port_opened);
        assert!(!b.port_opened);

        assert!(!table.remove(a.id).unwrap().port_closed);
        assert!(table.remove(b.id).unwrap().port_closed);
        assert_eq!(table.remove(b.id), Err(CrpError::UnknownIdentity(b.id)));
    }

    #[test]
    fn test_rejects_bad_addresses() {
        let mut table = IdentityTable::default();
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        assert!(table.register(LogicalAddress::UNASSIGNED, ip, MASK, 1).is_err());
        assert!(table.register(addr("5:255"), ip, MASK, 1).is_err());
        table.register(addr("5"), ip, MASK, 1).unwrap();
        assert_eq!(
            table.register(addr("5"), ip, MASK, 2),
            Err(CrpError::DuplicateIdentity(addr("5")))
        );
    }

    #[test]
    fn test_broadcast_ip() {
        let mut table = IdentityTable::default();
        let reg = table
            .register(addr("7"), Ipv4Addr::new(192, 168, 4, 20), Ipv4Addr::new(255, 255, 252, 0), 24101)
            .unwrap();
        assert_eq!(
            table.get(reg.id).unwrap().broadcast_ip(),
            Ipv4Addr::new(192, 168, 7, 255)
        );
    }
}

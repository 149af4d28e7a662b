//! CRP wire format
//!
//! ```text
//! ┌───────┬─────────┬──────┬────────────┬───────────┬──────────────────┐
//! │ 0xC1  │ version │ kind │ request id │ ttl class │ target address   │
//! │ 1     │ 1       │ 1    │ u16        │ u8        │ 9                │
//! ├───────┴─────────┴──────┴────────────┴───────────┴──────────────────┤
//! │ reply only: ipv4 (4) │ port u16                                    │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A reply carrying `0.0.0.0` means "the address you received this from".

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;
use vip_core::address::WIRE_LEN;
use vip_core::LogicalAddress;

use crate::cache::TtlClass;
use crate::{CrpError, Result};

/// First byte of every CRP datagram
pub const MAGIC: u8 = 0xC1;

pub const VERSION: u8 = 1;

pub const REQUEST_LEN: usize = 6 + WIRE_LEN;
pub const REPLY_LEN: usize = REQUEST_LEN + 6;

mod kind {
    pub const REQUEST: u8 = 1;
    pub const REPLY: u8 = 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrpPacket {
    Request {
        id: u16,
        ttl: TtlClass,
        target: LogicalAddress,
    },
    Reply {
        id: u16,
        ttl: TtlClass,
        target: LogicalAddress,
        ip: Ipv4Addr,
        port: u16,
    },
}

impl CrpPacket {
    pub fn target(&self) -> &LogicalAddress {
        match self {
            CrpPacket::Request { target, .. } | CrpPacket::Reply { target, .. } => target,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(REPLY_LEN);
        buf.put_u8(MAGIC);
        buf.put_u8(VERSION);
        match self {
            CrpPacket::Request { id, ttl, target } => {
                buf.put_u8(kind::REQUEST);
                buf.put_u16(*id);
                buf.put_u8(ttl.to_u8());
                target.write(&mut buf);
            }
            CrpPacket::Reply {
                id,
                ttl,
                target,
                ip,
                port,
            } => {
                buf.put_u8(kind::REPLY);
                buf.put_u16(*id);
                buf.put_u8(ttl.to_u8());
                target.write(&mut buf);
                buf.put_slice(&ip.octets());
                buf.put_u16(*port);
            }
        }
        buf.freeze()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < REQUEST_LEN {
            return Err(CrpError::Malformed(format!("{} bytes", bytes.len())));
        }
        let mut buf = bytes;
        if buf.get_u8() != MAGIC {
            return Err(CrpError::Malformed("bad magic".to_string()));
        }
        let version = buf.get_u8();
        if version != VERSION {
            return Err(CrpError::Malformed(format!("version {}", version)));
        }
        let kind_code = buf.get_u8();
        let id = buf.get_u16();
        let ttl_code = buf.get_u8();
        let ttl = TtlClass::from_u8(ttl_code)
            .ok_or_else(|| CrpError::Malformed(format!("ttl class {}", ttl_code)))?;
        let target = LogicalAddress::read(&mut buf);

        match kind_code {
            kind::REQUEST => Ok(CrpPacket::Request { id, ttl, target }),
            kind::REPLY => {
                if bytes.len() < REPLY_LEN {
                    return Err(CrpError::Malformed("short reply".to_string()));
                }
                let ip = Ipv4Addr::from(buf.get_u32());
                let port = buf.get_u16();
                Ok(CrpPacket::Reply {
                    id,
                    ttl,
                    target,
                    ip,
                    port,
                })
            }
            other => Err(CrpError::Malformed(format!("kind {}", other))),
        }
    }
}

//! CTP wire format
//!
//! ```text
//! ┌──────┬─────────┬──────┬───────┬──────────┬──────────┬─────┬─────┬──────┐
//! │ 0xC2 │ version │ kind │ flags │ src conn │ dst conn │ seq │ ack │ sack │
//! │ 1    │ 1       │ 1    │ 1     │ u32      │ u32      │ u32 │ u32 │ u32  │
//! ├──────┴─────────┴──────┴───────┴──────────┴──────────┴─────┴─────┴──────┤
//! │ src address (9) │ dst address (9) │ payload (DATA / BROADCAST only)    │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `src conn` / `dst conn` are the connection ids chosen by each end; a
//! sender that has not heard from its peer yet puts `0` in `dst conn`.
//! `ack` is the next sequence number the sender of the ACK expects, and
//! bit `i` of `sack` reports `ack + 1 + i` as already received.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use vip_core::address::WIRE_LEN;
use vip_core::LogicalAddress;

use crate::{CtpError, Result};

/// First byte of every CTP datagram
pub const MAGIC: u8 = 0xC2;

pub const VERSION: u8 = 1;

pub const HEADER_LEN: usize = 24 + 2 * WIRE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Data = 1,
    Ack = 2,
    Fin = 3,
    Reset = 4,
    Broadcast = 5,
}

impl PacketKind {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(PacketKind::Data),
            2 => Some(PacketKind::Ack),
            3 => Some(PacketKind::Fin),
            4 => Some(PacketKind::Reset),
            5 => Some(PacketKind::Broadcast),
            _ => None,
        }
    }

    /// Kinds that occupy a sequence number
    pub fn is_sequenced(self) -> bool {
        matches!(self, PacketKind::Data | PacketKind::Fin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtpPacket {
    pub kind: PacketKind,
    pub src_conn: u32,
    pub dst_conn: u32,
    pub seq: u32,
    pub ack: u32,
    pub sack: u32,
    pub src: LogicalAddress,
    pub dst: LogicalAddress,
    pub payload: Bytes,
}

impl CtpPacket {
    pub fn new(kind: PacketKind, src: LogicalAddress, dst: LogicalAddress) -> Self {
        Self {
            kind,
            src_conn: 0,
            dst_conn: 0,
            seq: 0,
            ack: 0,
            sack: 0,
            src,
            dst,
            payload: Bytes::new(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(self.kind as u8);
        // flags: none defined yet
        buf.put_u8(0);
        buf.put_u32(self.src_conn);
        buf.put_u32(self.dst_conn);
        buf.put_u32(self.seq);
        buf.put_u32(self.ack);
        buf.put_u32(self.sack);
        self.src.write(&mut buf);
        self.dst.write(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(CtpError::Malformed(format!("{} bytes", bytes.len())));
        }
        let mut buf = bytes;
        if buf.get_u8() != MAGIC {
            return Err(CtpError::Malformed("bad magic".to_string()));
        }
        let version = buf.get_u8();
        if version != VERSION {
            return Err(CtpError::Malformed(format!("version {}", version)));
        }
        let code = buf.get_u8();
        let kind =
            PacketKind::from_u8(code).ok_or_else(|| CtpError::Malformed(format!("kind {}", code)))?;
        let _flags = buf.get_u8();

        let src_conn = buf.get_u32();
        let dst_conn = buf.get_u32();
        let seq = buf.get_u32();
        let ack = buf.get_u32();
        let sack = buf.get_u32();
        let src = LogicalAddress::read(&mut buf);
        let dst = LogicalAddress::read(&mut buf);

        if kind.is_sequenced() && seq == 0 {
            return Err(CtpError::Malformed("sequence number 0".to_string()));
        }

        Ok(Self {
            kind,
            src_conn,
            dst_conn,
            seq,
            ack,
            sack,
            src,
            dst,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}

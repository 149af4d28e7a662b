//! Channels and the callbacks that serve them

use bytes::{Buf, Bytes, BytesMut};
use std::fmt;
use std::ops::BitOr;
use vip_core::address::WIRE_LEN;
use vip_core::LogicalAddress;

use crate::lane::LaneState;
use crate::{CloseReason, Result, TunnelError};

/// Channel id, unique within a tunnel. Clients allocate odd ids and
/// servers even ones, so both ends can open channels without colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub(crate) u16);

impl ChannelId {
    pub fn raw(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Four-byte tag naming what a channel carries
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId([u8; 4]);

impl ServiceId {
    /// CTP packets for the logical addresses listed in the metadata
    pub const CTP: ServiceId = ServiceId(*b"CTP0");
    pub const RTSP: ServiceId = ServiceId(*b"RTSP");
    /// Generic service
    pub const GENERIC: ServiceId = ServiceId(*b"GSVC");

    pub const fn new(tag: [u8; 4]) -> Self {
        Self(tag)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceId({})", self)
    }
}

/// Preferred underlying transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Preference {
    Stream = 0,
    Datagram = 1,
    SecureStream = 2,
}

impl Preference {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(Preference::Stream),
            1 => Some(Preference::Datagram),
            2 => Some(Preference::SecureStream),
            _ => None,
        }
    }
}

/// Per-send delivery flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SendFlags(u8);

impl SendFlags {
    pub const NONE: SendFlags = SendFlags(0);
    /// Use the lane if active, the stream otherwise
    pub const DATAGRAM: SendFlags = SendFlags(0x01);
    /// Use the lane if active, drop otherwise
    pub const FORCE_DATAGRAM: SendFlags = SendFlags(0x02);

    pub fn contains(self, other: SendFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SendFlags {
    type Output = SendFlags;

    fn bitor(self, rhs: SendFlags) -> SendFlags {
        SendFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Created locally, not yet opened
    Created,
    /// OPEN_REQ sent, waiting for the peer
    Opening,
    Open,
    /// Waiting to be freed on the next pass
    Closed,
}

/// Work queued by a handler; applied by the tunnel once the callback
/// returns
#[derive(Debug, Default)]
pub struct Outbox {
    pub(crate) ops: Vec<OutboxOp>,
}

#[derive(Debug)]
pub(crate) enum OutboxOp {
    Send {
        channel: ChannelId,
        data: Bytes,
        flags: SendFlags,
    },
    Close(ChannelId),
}

impl Outbox {
    pub fn send(&mut self, channel: ChannelId, data: impl Into<Bytes>, flags: SendFlags) {
        self.ops.push(OutboxOp::Send {
            channel,
            data: data.into(),
            flags,
        });
    }

    pub fn close(&mut self, channel: ChannelId) {
        self.ops.push(OutboxOp::Close(channel));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Send/receive operations for one channel
pub trait ChannelHandler: Send {
    fn on_data(&mut self, channel: ChannelId, data: Bytes, out: &mut Outbox);

    /// The peer acknowledged the open (or we accepted theirs)
    fn on_open(&mut self, _channel: ChannelId, _out: &mut Outbox) {}

    fn on_open_failed(&mut self, _channel: ChannelId, _error: TunnelError) {}

    fn on_closed(&mut self, _channel: ChannelId) {}
}

/// An OPEN_REQ from the peer
#[derive(Debug, Clone)]
pub struct IncomingChannel<'a> {
    pub id: ChannelId,
    pub service: ServiceId,
    pub preference: Preference,
    pub metadata: &'a [u8],
}

/// Tunnel-level callbacks
pub trait TunnelHandler: Send {
    /// Accept a channel by returning its handler, or refuse it; the error
    /// is sent back to the peer
    fn on_incoming_channel(&mut self, request: &IncomingChannel<'_>) -> Result<Box<dyn ChannelHandler>>;

    fn on_lane_status(&mut self, _state: LaneState) {}

    fn on_closed(&mut self, _reason: &CloseReason) {}
}

/// Metadata for a [`ServiceId::CTP`] channel: the addresses it carries
pub fn ctp_metadata(addresses: &[LogicalAddress]) -> Bytes {
    let mut buf = BytesMut::with_capacity(addresses.len() * WIRE_LEN);
    for address in addresses {
        address.write(&mut buf);
    }
    buf.freeze()
}

pub fn parse_ctp_metadata(mut metadata: &[u8]) -> Result<Vec<LogicalAddress>> {
    if metadata.len() % WIRE_LEN != 0 {
        return Err(TunnelError::Malformed);
    }
    let mut addresses = Vec::with_capacity(metadata.len() / WIRE_LEN);
    while metadata.has_remaining() {
        let address = LogicalAddress::read(&mut metadata);
        if !address.is_valid() {
            return Err(TunnelError::Malformed);
        }
        addresses.push(address);
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_display() {
        assert_eq!(ServiceId::CTP.to_string(), "CTP0");
        assert_eq!(ServiceId::new([b'A', 0, b'B', b'C']).to_string(), "A\\x00BC");
    }

    #[test]
    fn test_flags() {
        let flags = SendFlags::DATAGRAM | SendFlags::FORCE_DATAGRAM;
        assert!(flags.contains(SendFlags::DATAGRAM));
        assert!(!SendFlags::NONE.contains(SendFlags::DATAGRAM));
    }

    #[test]
    fn test_ctp_metadata() {
        let addresses = vec![
            LogicalAddress::parse("123").unwrap(),
            LogicalAddress::parse("456:1").unwrap(),
        ];
        let metadata = ctp_metadata(&addresses);
        assert_eq!(metadata.len(), 2 * WIRE_LEN);
        assert_eq!(parse_ctp_metadata(&metadata).unwrap(), addresses);
        assert_eq!(
            parse_ctp_metadata(&metadata[..5]),
            Err(TunnelError::Malformed)
        );
    }
}

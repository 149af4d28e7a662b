//! Tunnel frame encoding/decoding
//!
//! ```text
//! ┌──────────┬──────────┬──────────────────┬──────────────────┐
//! │ type u8  │ flags u8 │ channel u16      │ length u16       │
//! ├──────────┴──────────┴──────────────────┴──────────────────┤
//! │ payload (length bytes)                                    │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! The header carries the length, so the outer stream needs no further
//! framing. Channel `0` addresses the tunnel itself (KEEPALIVE, GOODBYE,
//! LANE_OFFER).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::channel::{Preference, ServiceId};
use crate::{Result, TunnelError};

pub const HEADER_SIZE: usize = 6;

pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// DATA flag: the sender asked for datagram delivery but the lane was down
pub const FLAG_DATAGRAM: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    OpenReq = 1,
    OpenAck = 2,
    OpenNack = 3,
    Data = 4,
    Close = 5,
    Keepalive = 6,
    Goodbye = 7,
    LaneOffer = 8,
}

impl FrameKind {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(FrameKind::OpenReq),
            2 => Some(FrameKind::OpenAck),
            3 => Some(FrameKind::OpenNack),
            4 => Some(FrameKind::Data),
            5 => Some(FrameKind::Close),
            6 => Some(FrameKind::Keepalive),
            7 => Some(FrameKind::Goodbye),
            8 => Some(FrameKind::LaneOffer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub flags: u8,
    pub channel: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: FrameKind, channel: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            flags: 0,
            channel,
            payload: payload.into(),
        }
    }

    /// Frame for the tunnel itself
    pub fn control(kind: FrameKind) -> Self {
        Self::new(kind, 0, Bytes::new())
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TunnelError::Malformed);
        }
        buf.reserve(self.size());
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.flags);
        buf.put_u16(self.channel);
        buf.put_u16(self.payload.len() as u16);
        buf.extend_from_slice(&self.payload);
        Ok(())
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode one complete frame
    pub fn decode(mut buf: impl Buf) -> Result<Self> {
        if buf.remaining() < HEADER_SIZE {
            return Err(TunnelError::PacketTooShort);
        }
        let kind = FrameKind::from_u8(buf.get_u8()).ok_or(TunnelError::Malformed)?;
        let flags = buf.get_u8();
        let channel = buf.get_u16();
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(TunnelError::PacketTooShort);
        }
        Ok(Self {
            kind,
            flags,
            channel,
            payload: buf.copy_to_bytes(len),
        })
    }

    /// Length of the first frame in `buf`, once all of it has arrived
    pub fn check_complete(buf: &[u8]) -> Option<usize> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let total = HEADER_SIZE + u16::from_be_bytes([buf[4], buf[5]]) as usize;
        (buf.len() >= total).then_some(total)
    }

    /// Split the next complete frame off a stream buffer
    pub fn next_from(buf: &mut BytesMut) -> Result<Option<Self>> {
        match Self::check_complete(buf) {
            Some(len) => Self::decode(buf.split_to(len).freeze()).map(Some),
            None => Ok(None),
        }
    }
}

/// OPEN_REQ payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub service: ServiceId,
    pub preference: Preference,
    pub metadata: Bytes,
}

impl OpenRequest {
    pub const MIN_LEN: usize = 5;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::MIN_LEN + self.metadata.len());
        buf.put_slice(self.service.as_bytes());
        buf.put_u8(self.preference as u8);
        buf.extend_from_slice(&self.metadata);
        buf.freeze()
    }

    pub fn decode(payload: &Bytes) -> Result<Self> {
        if payload.len() < Self::MIN_LEN {
            return Err(TunnelError::PacketTooShort);
        }
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&payload[..4]);
        let preference = Preference::from_u8(payload[4]).ok_or(TunnelError::Malformed)?;
        Ok(Self {
            service: ServiceId::new(tag),
            preference,
            metadata: payload.slice(Self::MIN_LEN..),
        })
    }
}

/// LANE_OFFER payload: token and server lane port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneOffer {
    pub token: u32,
    pub port: u16,
}

impl LaneOffer {
    pub const LEN: usize = 6;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u32(self.token);
        buf.put_u16(self.port);
        buf.freeze()
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::LEN {
            return Err(TunnelError::PacketTooShort);
        }
        Ok(Self {
            token: payload.get_u32(),
            port: payload.get_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let frame = Frame::new(FrameKind::Data, 0x0103, &b"abc"[..]).with_flags(FLAG_DATAGRAM);
        let encoded = frame.encode().unwrap();
        assert_eq!(&encoded[..], &[4, 1, 0x01, 0x03, 0, 3, b'a', b'b', b'c']);
        assert_eq!(Frame::decode(&encoded[..]).unwrap(), frame);
    }

    #[test]
    fn test_stream_reassembly() {
        let mut stream = BytesMut::new();
        Frame::control(FrameKind::Keepalive)
            .encode_into(&mut stream)
            .unwrap();
        let data = Frame::new(FrameKind::Data, 1, &b"payload"[..]).encode().unwrap();
        stream.extend_from_slice(&data[..4]);

        assert_eq!(
            Frame::next_from(&mut stream).unwrap().map(|f| f.kind),
            Some(FrameKind::Keepalive)
        );
        assert_eq!(Frame::next_from(&mut stream).unwrap(), None);

        stream.extend_from_slice(&data[4..]);
        let frame = Frame::next_from(&mut stream).unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"payload");
        assert!(stream.is_empty());
    }

    #[test]
    fn test_bad_frames() {
        assert_eq!(Frame::decode(&[4u8, 0, 0][..]), Err(TunnelError::PacketTooShort));
        assert_eq!(
            Frame::decode(&[99u8, 0, 0, 1, 0, 0][..]),
            Err(TunnelError::Malformed)
        );
        assert_eq!(
            Frame::decode(&[4u8, 0, 0, 1, 0, 5, 1][..]),
            Err(TunnelError::PacketTooShort)
        );
    }

    #[test]
    fn test_open_request() {
        let request = OpenRequest {
            service: ServiceId::RTSP,
            preference: Preference::Datagram,
            metadata: Bytes::from_static(b"cam1"),
        };
        assert_eq!(OpenRequest::decode(&request.encode()).unwrap(), request);
        assert_eq!(
            OpenRequest::decode(&Bytes::from_static(b"RTS")),
            Err(TunnelError::PacketTooShort)
        );
        assert_eq!(
            OpenRequest::decode(&Bytes::from_static(b"RTSP\x09")),
            Err(TunnelError::Malformed)
        );
    }
}

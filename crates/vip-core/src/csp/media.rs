//! MEDIAREQ / MEDIAOFFER
//!
//! ```text
//! 0     2     3       4      5     6              10     12
//! ├ hdr ┼ kind┼ action┼ flags┼ rsv ┼ ipv4 / channel┼ port ┤  base (12)
//! 12         14             18                          26       27
//! ├ rtp mtu ─┼ bitrate kbps ┼ min w, min h, max w, max h ┼ flow id┤
//! ```
//!
//! Optional fields are written up to the last one set; zero means unset.

use super::malformed;
use crate::Result;
use bytes::{Buf, BufMut, BytesMut};
use std::net::{Ipv4Addr, SocketAddrV4};

pub const MEDIA_LEN_BASE: usize = 12;
const MEDIA_LEN_MTU: usize = 14;
const MEDIA_LEN_BITRATE: usize = 18;
const MEDIA_LEN_RESOLUTION: usize = 26;
const MEDIA_LEN_FLOW: usize = 27;

const FLAG_TUNNEL: u8 = 0x01;
const FLAG_HOLE_PUNCH: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MediaKind {
    Audio = 1,
    Video = 2,
}

impl MediaKind {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(MediaKind::Audio),
            2 => Some(MediaKind::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MediaAction {
    Stop = 0,
    Start = 1,
}

impl MediaAction {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(MediaAction::Stop),
            1 => Some(MediaAction::Start),
            _ => None,
        }
    }
}

/// Where the media stream should be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEndpoint {
    /// Plain RTP over UDP
    Udp(SocketAddrV4),
    /// Carried on a tunnel datagram channel
    Tunnel { channel: u32 },
}

/// Video resolution limits in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolutionBounds {
    pub min_width: u16,
    pub min_height: u16,
    pub max_width: u16,
    pub max_height: u16,
}

impl ResolutionBounds {
    fn is_unset(&self) -> bool {
        *self == ResolutionBounds::default()
    }
}

/// Body shared by MEDIAREQ and MEDIAOFFER
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaMessage {
    pub kind: MediaKind,
    pub action: MediaAction,
    pub endpoint: MediaEndpoint,
    pub hole_punch: bool,
    pub rtp_mtu: Option<u16>,
    pub bitrate_kbps: Option<u32>,
    pub resolution: Option<ResolutionBounds>,
    pub flow_id: Option<u8>,
}

impl MediaMessage {
    pub fn new(kind: MediaKind, action: MediaAction, endpoint: MediaEndpoint) -> Self {
        Self {
            kind,
            action,
            endpoint,
            hole_punch: false,
            rtp_mtu: None,
            bitrate_kbps: None,
            resolution: None,
            flow_id: None,
        }
    }

    /// Record length needed for the optional fields that are set
    fn encoded_len(&self) -> usize {
        if self.flow_id.is_some() {
            MEDIA_LEN_FLOW
        } else if self.resolution.is_some() {
            MEDIA_LEN_RESOLUTION
        } else if self.bitrate_kbps.is_some() {
            MEDIA_LEN_BITRATE
        } else if self.rtp_mtu.is_some() {
            MEDIA_LEN_MTU
        } else {
            MEDIA_LEN_BASE
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.action as u8);

        let mut flags = 0u8;
        if self.hole_punch {
            flags |= FLAG_HOLE_PUNCH;
        }
        match self.endpoint {
            MediaEndpoint::Udp(addr) => {
                buf.put_u8(flags);
                buf.put_u8(0);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            MediaEndpoint::Tunnel { channel } => {
                buf.put_u8(flags | FLAG_TUNNEL);
                buf.put_u8(0);
                buf.put_u32(channel);
                buf.put_u16(0);
            }
        }

        let len = self.encoded_len();
        if len >= MEDIA_LEN_MTU {
            buf.put_u16(self.rtp_mtu.unwrap_or(0));
        }
        if len >= MEDIA_LEN_BITRATE {
            buf.put_u32(self.bitrate_kbps.unwrap_or(0));
        }
        if len >= MEDIA_LEN_RESOLUTION {
            let res = self.resolution.unwrap_or_default();
            buf.put_u16(res.min_width);
            buf.put_u16(res.min_height);
            buf.put_u16(res.max_width);
            buf.put_u16(res.max_height);
        }
        if len >= MEDIA_LEN_FLOW {
            buf.put_u8(self.flow_id.unwrap_or(0));
        }
    }

    pub(crate) fn decode(buf: &mut &[u8], len: usize) -> Result<Self> {
        let kind_code = buf.get_u8();
        let kind = MediaKind::from_u8(kind_code).ok_or_else(|| malformed("media kind", kind_code))?;
        let action_code = buf.get_u8();
        let action =
            MediaAction::from_u8(action_code).ok_or_else(|| malformed("media action", action_code))?;
        let flags = buf.get_u8();
        let _reserved = buf.get_u8();

        let endpoint = if flags & FLAG_TUNNEL != 0 {
            let channel = buf.get_u32();
            buf.advance(2);
            MediaEndpoint::Tunnel { channel }
        } else {
            let ip = Ipv4Addr::from(buf.get_u32());
            let port = buf.get_u16();
            MediaEndpoint::Udp(SocketAddrV4::new(ip, port))
        };

        let mut message = MediaMessage::new(kind, action, endpoint);
        message.hole_punch = flags & FLAG_HOLE_PUNCH != 0;

        if len >= MEDIA_LEN_MTU {
            message.rtp_mtu = super::non_zero_u16(buf.get_u16());
        }
        if len >= MEDIA_LEN_BITRATE {
            let bitrate = buf.get_u32();
            message.bitrate_kbps = (bitrate != 0).then_some(bitrate);
        }
        if len >= MEDIA_LEN_RESOLUTION {
            let res = ResolutionBounds {
                min_width: buf.get_u16(),
                min_height: buf.get_u16(),
                max_width: buf.get_u16(),
                max_height: buf.get_u16(),
            };
            message.resolution = (!res.is_unset()).then_some(res);
        }
        if len >= MEDIA_LEN_FLOW {
            let flow = buf.get_u8();
            message.flow_id = (flow != 0).then_some(flow);
        }

        Ok(message)
    }
}

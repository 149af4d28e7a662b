//! Sub-unit registration and address capture
//!
//! A sub-unit registers its address with its gateway and renews before the
//! TTL runs out. A capture reserves a whole range of main addresses for a
//! forwarding device; `ttl == 0` in CAPTURE_UPDATE releases it.

use super::malformed;
use crate::{AddressRange, Error, LogicalAddress, Result};
use bytes::{Buf, BufMut, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegisterResult {
    Accepted = 0,
    Rejected = 1,
    /// Address already held by a unit on the internal bus
    AlreadyRegisteredInternal = 2,
}

impl RegisterResult {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(RegisterResult::Accepted),
            1 => Some(RegisterResult::Rejected),
            2 => Some(RegisterResult::AlreadyRegisteredInternal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureResult {
    Ok = 0,
    Refused = 1,
    UnknownHandle = 2,
    Overlap = 3,
}

impl CaptureResult {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(CaptureResult::Ok),
            1 => Some(CaptureResult::Refused),
            2 => Some(CaptureResult::UnknownHandle),
            3 => Some(CaptureResult::Overlap),
            _ => None,
        }
    }
}

/// REGISTER_REQ and REGISTER_RENEW
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMessage {
    pub subunit: LogicalAddress,
    /// Seconds
    pub ttl: u16,
}

impl RegisterMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.subunit.write(buf);
        buf.put_u16(self.ttl);
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Self {
        Self {
            subunit: LogicalAddress::read(buf),
            ttl: buf.get_u16(),
        }
    }
}

/// REGISTER_RES
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterResMessage {
    pub result: RegisterResult,
    /// TTL granted by the gateway
    pub ttl: u16,
}

impl RegisterResMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.result as u8);
        buf.put_u16(self.ttl);
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Result<Self> {
        let code = buf.get_u8();
        let result = RegisterResult::from_u8(code).ok_or_else(|| malformed("register result", code))?;
        Ok(Self {
            result,
            ttl: buf.get_u16(),
        })
    }
}

/// CAPTURE_ADD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureAddMessage {
    pub range: AddressRange,
    pub ttl: u16,
    /// Chosen by the requester, echoed in CAPTURE_RES
    pub handle: u16,
}

impl CaptureAddMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.range.write(buf);
        buf.put_u16(self.ttl);
        buf.put_u16(self.handle);
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Result<Self> {
        let range = AddressRange::read(buf);
        if !range.is_valid() {
            return Err(Error::InvalidRange(range.to_string()));
        }
        Ok(Self {
            range,
            ttl: buf.get_u16(),
            handle: buf.get_u16(),
        })
    }
}

/// CAPTURE_UPDATE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureUpdateMessage {
    pub handle: u16,
    pub ttl: u16,
}

impl CaptureUpdateMessage {
    /// True when this update releases the capture
    pub fn is_release(&self) -> bool {
        self.ttl == 0
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.handle);
        buf.put_u16(self.ttl);
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Self {
        Self {
            handle: buf.get_u16(),
            ttl: buf.get_u16(),
        }
    }
}

/// CAPTURE_RES
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureResMessage {
    pub handle: u16,
    pub result: CaptureResult,
}

impl CaptureResMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.handle);
        buf.put_u8(self.result as u8);
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Result<Self> {
        let handle = buf.get_u16();
        let code = buf.get_u8();
        let result = CaptureResult::from_u8(code).ok_or_else(|| malformed("capture result", code))?;
        Ok(Self { handle, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csp::{decode, encode, Message};

    #[test]
    fn test_register_record_length() {
        let req = RegisterMessage {
            subunit: LogicalAddress::parse("456:128").unwrap(),
            ttl: 300,
        };
        let encoded = encode(&Message::RegisterReq(req)).unwrap();
        assert_eq!(encoded.len(), 13);
        assert_eq!(decode(&encoded).unwrap(), Message::RegisterReq(req));
    }

    #[test]
    fn test_inverted_capture_range_is_rejected() {
        let mut raw = vec![0u8, crate::csp::msg::CAPTURE_ADD];
        raw.extend_from_slice(b"00000200");
        raw.extend_from_slice(b"00000100");
        raw.extend_from_slice(&[0, 60, 0, 1]);
        assert!(matches!(decode(&raw), Err(Error::InvalidRange(_))));
    }

    #[test]
    fn test_capture_release() {
        let update = CaptureUpdateMessage { handle: 4, ttl: 0 };
        assert!(update.is_release());
    }
}

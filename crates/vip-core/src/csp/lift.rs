//! Lift control and fire alarm records
//!
//! Floors and landings are signed so basements can be addressed.

use super::{malformed, non_zero_u16, read_text};
use crate::address::WIRE_LEN;
use crate::{LogicalAddress, Result};
use bytes::{Buf, BufMut, BytesMut};

const LIFTCALL_LEN_DIRECTION: usize = 6;
const LIFTSTATUS_LEN_FAULT: usize = 8;
const FIRE_LEN_BASE: usize = 5;
const FIRE_LEN_SOURCE: usize = FIRE_LEN_BASE + WIRE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiftResult {
    Accepted,
    Busy,
    OutOfService,
    Denied,
    Other(u8),
}

impl LiftResult {
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => LiftResult::Accepted,
            1 => LiftResult::Busy,
            2 => LiftResult::OutOfService,
            3 => LiftResult::Denied,
            other => LiftResult::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            LiftResult::Accepted => 0,
            LiftResult::Busy => 1,
            LiftResult::OutOfService => 2,
            LiftResult::Denied => 3,
            LiftResult::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LiftDirection {
    Up = 1,
    Down = 2,
}

impl LiftDirection {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(LiftDirection::Up),
            2 => Some(LiftDirection::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LiftMotion {
    Stopped = 0,
    Up = 1,
    Down = 2,
}

impl LiftMotion {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(LiftMotion::Stopped),
            1 => Some(LiftMotion::Up),
            2 => Some(LiftMotion::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum FireLevel {
    Clear = 0,
    PreAlarm = 1,
    Alarm = 2,
}

impl FireLevel {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(FireLevel::Clear),
            1 => Some(FireLevel::PreAlarm),
            2 => Some(FireLevel::Alarm),
            _ => None,
        }
    }
}

/// LIFTLAND_REQ: grant access to a landing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiftLandReqMessage {
    pub lift: u8,
    pub landing: i8,
}

impl LiftLandReqMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.lift);
        buf.put_i8(self.landing);
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Self {
        Self {
            lift: buf.get_u8(),
            landing: buf.get_i8(),
        }
    }
}

/// LIFTLAND_RES
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiftLandResMessage {
    pub lift: u8,
    pub landing: i8,
    pub result: LiftResult,
}

impl LiftLandResMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.lift);
        buf.put_i8(self.landing);
        buf.put_u8(self.result.to_u8());
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Self {
        Self {
            lift: buf.get_u8(),
            landing: buf.get_i8(),
            result: LiftResult::from_u8(buf.get_u8()),
        }
    }
}

/// LIFTCALL_REQ: call a car from one floor to another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiftCallReqMessage {
    pub lift: u8,
    pub from_floor: i8,
    pub to_floor: i8,
    pub direction: Option<LiftDirection>,
}

impl LiftCallReqMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.lift);
        buf.put_i8(self.from_floor);
        buf.put_i8(self.to_floor);
        if let Some(direction) = self.direction {
            buf.put_u8(direction as u8);
        }
    }

    pub(crate) fn decode(buf: &mut &[u8], len: usize) -> Result<Self> {
        let lift = buf.get_u8();
        let from_floor = buf.get_i8();
        let to_floor = buf.get_i8();
        let direction = if len >= LIFTCALL_LEN_DIRECTION {
            let code = buf.get_u8();
            Some(LiftDirection::from_u8(code).ok_or_else(|| malformed("lift direction", code))?)
        } else {
            None
        };
        Ok(Self {
            lift,
            from_floor,
            to_floor,
            direction,
        })
    }
}

/// LIFTCALL_RES
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiftCallResMessage {
    pub lift: u8,
    pub result: LiftResult,
}

impl LiftCallResMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.lift);
        buf.put_u8(self.result.to_u8());
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Self {
        Self {
            lift: buf.get_u8(),
            result: LiftResult::from_u8(buf.get_u8()),
        }
    }
}

/// LIFTSTATUS_REQ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiftStatusReqMessage {
    pub lift: u8,
}

impl LiftStatusReqMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.lift);
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Self {
        Self { lift: buf.get_u8() }
    }
}

/// LIFTSTATUS_RES
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiftStatusResMessage {
    pub lift: u8,
    pub floor: i8,
    pub motion: LiftMotion,
    pub door_open: bool,
    /// Controller fault code, if any
    pub fault: Option<u16>,
}

impl LiftStatusResMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.lift);
        buf.put_i8(self.floor);
        buf.put_u8(self.motion as u8);
        buf.put_u8(self.door_open as u8);
        if let Some(fault) = self.fault {
            buf.put_u16(fault);
        }
    }

    pub(crate) fn decode(buf: &mut &[u8], len: usize) -> Result<Self> {
        let lift = buf.get_u8();
        let floor = buf.get_i8();
        let code = buf.get_u8();
        let motion = LiftMotion::from_u8(code).ok_or_else(|| malformed("lift motion", code))?;
        let door_open = buf.get_u8() != 0;
        let fault = if len >= LIFTSTATUS_LEN_FAULT {
            non_zero_u16(buf.get_u16())
        } else {
            None
        };
        Ok(Self {
            lift,
            floor,
            motion,
            door_open,
            fault,
        })
    }
}

/// FIRE_ALERT: fire panel zone state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireAlertMessage {
    pub zone: u16,
    pub level: FireLevel,
    pub source: Option<LogicalAddress>,
    pub text: Option<String>,
}

impl FireAlertMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.zone);
        buf.put_u8(self.level as u8);
        if self.source.is_some() || self.text.is_some() {
            self.source.unwrap_or(LogicalAddress::UNASSIGNED).write(buf);
        }
        if let Some(ref text) = self.text {
            buf.put_slice(text.as_bytes());
        }
    }

    pub(crate) fn decode(buf: &mut &[u8], len: usize) -> Result<Self> {
        let zone = buf.get_u16();
        let code = buf.get_u8();
        let level = FireLevel::from_u8(code).ok_or_else(|| malformed("fire level", code))?;
        let mut message = Self {
            zone,
            level,
            source: None,
            text: None,
        };
        if len >= FIRE_LEN_SOURCE {
            let source = LogicalAddress::read(buf);
            message.source = (!source.is_unassigned()).then_some(source);
        }
        if len > FIRE_LEN_SOURCE {
            message.text = Some(read_text(buf)?);
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csp::{decode, encode, msg, Message};

    #[test]
    fn test_basement_landing() {
        let decoded = decode(&[0, msg::LIFTLAND_REQ, 1, 0xFE]).unwrap();
        assert_eq!(
            decoded,
            Message::LiftLandReq(LiftLandReqMessage { lift: 1, landing: -2 })
        );
    }

    #[test]
    fn test_lift_status_fault() {
        let status = LiftStatusResMessage {
            lift: 2,
            floor: 4,
            motion: LiftMotion::Up,
            door_open: false,
            fault: Some(0x0101),
        };
        let encoded = encode(&Message::LiftStatusRes(status)).unwrap();
        assert_eq!(encoded.len(), LIFTSTATUS_LEN_FAULT);
        assert_eq!(decode(&encoded).unwrap(), Message::LiftStatusRes(status));
    }

    #[test]
    fn test_fire_alert_text_only() {
        let alert = FireAlertMessage {
            zone: 12,
            level: FireLevel::Alarm,
            source: None,
            text: Some("stairwell B".to_string()),
        };
        let encoded = encode(&Message::FireAlert(alert.clone())).unwrap();
        assert_eq!(decode(&encoded).unwrap(), Message::FireAlert(alert));
    }

    #[test]
    fn test_bad_fire_level() {
        assert!(decode(&[0, msg::FIRE_ALERT, 0, 1, 9]).is_err());
    }
}

//! CSP signalling messages
//!
//! CSP records travel as CTP message payloads. Every record has the same
//! shape:
//! ```text
//! ┌──────────┬──────────┬──────────────────┬──────────────────────────┐
//! │ reserved │ type     │ mandatory fields │ optional fields          │
//! │ 1 byte   │ 1 byte   │ fixed layout     │ gated by received length │
//! └──────────┴──────────┴──────────────────┴──────────────────────────┘
//! ```
//!
//! Optional fields are only read when the received record is long enough
//! to hold them, so older devices sending shorter records stay compatible.
//! Multi-byte integers are big-endian.
//!
//! Records shorter than the minimum length of their type are rejected
//! before any field is read. [`parse`] turns every decode failure into a
//! silent discard, which is what receivers use on the wire.

pub mod call;
pub mod control;
pub mod lift;
pub mod media;
pub mod registry;
pub mod service;

pub use call::{
    AlertType, AlertingMessage, CapabReportMessage, CallType, Capabilities, Forwarder,
    ForwarderRole, MediaHint, ReleaseCause, ReleaseMessage, StartExtension, StartLayout,
    StartMessage, UnitRole,
};
pub use control::{
    DoorState, DoorStatusMessage, OpenDoorMessage, OutputState, SetOutput2Message,
    SetOutputMessage, SetVirtInpMessage, VoiceState, VoiceStatusMessage,
};
pub use lift::{
    FireAlertMessage, FireLevel, LiftCallReqMessage, LiftCallResMessage, LiftDirection,
    LiftLandReqMessage, LiftLandResMessage, LiftMotion, LiftResult, LiftStatusReqMessage,
    LiftStatusResMessage,
};
pub use media::{MediaAction, MediaEndpoint, MediaKind, MediaMessage, ResolutionBounds};
pub use registry::{
    CaptureAddMessage, CaptureResMessage, CaptureResult, CaptureUpdateMessage, RegisterMessage,
    RegisterResMessage, RegisterResult,
};
pub use service::{
    ServiceActionMessage, ServiceCommand, ServiceKind, ServiceStatus, ServiceStatusMessage,
    StatusBand,
};

use crate::{Error, Result, MAX_CSP_SIZE};
use bytes::{Bytes, BytesMut, BufMut};
use tracing::trace;

/// Size of the record header
pub const HEADER_LEN: usize = 2;

/// Value written into the reserved header byte
pub const RESERVED: u8 = 0x00;

/// Message type codes
pub mod msg {
    pub const START: u8 = 0x01;
    pub const PROCEEDING: u8 = 0x02;
    pub const ALERTING: u8 = 0x03;
    pub const CONNECT: u8 = 0x04;
    pub const RELEASE: u8 = 0x05;
    pub const CAPAB_REPORT: u8 = 0x06;
    pub const MEDIAREQ: u8 = 0x10;
    pub const MEDIAOFFER: u8 = 0x11;
    pub const OPENDOOR: u8 = 0x20;
    pub const SETOUTPUT: u8 = 0x21;
    pub const SETOUTPUT2: u8 = 0x22;
    pub const DOORSTATUS: u8 = 0x23;
    pub const REGISTER_REQ: u8 = 0x30;
    pub const REGISTER_RES: u8 = 0x31;
    pub const REGISTER_RENEW: u8 = 0x32;
    pub const CAPTURE_ADD: u8 = 0x38;
    pub const CAPTURE_UPDATE: u8 = 0x39;
    pub const CAPTURE_RES: u8 = 0x3A;
    pub const SERVICE_ACTION: u8 = 0x40;
    pub const SERVICE_STATUS: u8 = 0x41;
    pub const VOICESTATUS: u8 = 0x50;
    pub const LIFTLAND_REQ: u8 = 0x60;
    pub const LIFTLAND_RES: u8 = 0x61;
    pub const LIFTCALL_REQ: u8 = 0x62;
    pub const LIFTCALL_RES: u8 = 0x63;
    pub const LIFTSTATUS_REQ: u8 = 0x64;
    pub const LIFTSTATUS_RES: u8 = 0x65;
    pub const FIRE_ALERT: u8 = 0x70;
    pub const SET_VIRTINP: u8 = 0x71;
}

/// Message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Start = msg::START,
    Proceeding = msg::PROCEEDING,
    Alerting = msg::ALERTING,
    Connect = msg::CONNECT,
    Release = msg::RELEASE,
    CapabReport = msg::CAPAB_REPORT,
    MediaReq = msg::MEDIAREQ,
    MediaOffer = msg::MEDIAOFFER,
    OpenDoor = msg::OPENDOOR,
    SetOutput = msg::SETOUTPUT,
    SetOutput2 = msg::SETOUTPUT2,
    DoorStatus = msg::DOORSTATUS,
    RegisterReq = msg::REGISTER_REQ,
    RegisterRes = msg::REGISTER_RES,
    RegisterRenew = msg::REGISTER_RENEW,
    CaptureAdd = msg::CAPTURE_ADD,
    CaptureUpdate = msg::CAPTURE_UPDATE,
    CaptureRes = msg::CAPTURE_RES,
    ServiceAction = msg::SERVICE_ACTION,
    ServiceStatus = msg::SERVICE_STATUS,
    VoiceStatus = msg::VOICESTATUS,
    LiftLandReq = msg::LIFTLAND_REQ,
    LiftLandRes = msg::LIFTLAND_RES,
    LiftCallReq = msg::LIFTCALL_REQ,
    LiftCallRes = msg::LIFTCALL_RES,
    LiftStatusReq = msg::LIFTSTATUS_REQ,
    LiftStatusRes = msg::LIFTSTATUS_RES,
    FireAlert = msg::FIRE_ALERT,
    SetVirtInp = msg::SET_VIRTINP,
}

impl MessageType {
    pub fn from_u8(val: u8) -> Option<Self> {
        use MessageType::*;
        let ty = match val {
            msg::START => Start,
            msg::PROCEEDING => Proceeding,
            msg::ALERTING => Alerting,
            msg::CONNECT => Connect,
            msg::RELEASE => Release,
            msg::CAPAB_REPORT => CapabReport,
            msg::MEDIAREQ => MediaReq,
            msg::MEDIAOFFER => MediaOffer,
            msg::OPENDOOR => OpenDoor,
            msg::SETOUTPUT => SetOutput,
            msg::SETOUTPUT2 => SetOutput2,
            msg::DOORSTATUS => DoorStatus,
            msg::REGISTER_REQ => RegisterReq,
            msg::REGISTER_RES => RegisterRes,
            msg::REGISTER_RENEW => RegisterRenew,
            msg::CAPTURE_ADD => CaptureAdd,
            msg::CAPTURE_UPDATE => CaptureUpdate,
            msg::CAPTURE_RES => CaptureRes,
            msg::SERVICE_ACTION => ServiceAction,
            msg::SERVICE_STATUS => ServiceStatus,
            msg::VOICESTATUS => VoiceStatus,
            msg::LIFTLAND_REQ => LiftLandReq,
            msg::LIFTLAND_RES => LiftLandRes,
            msg::LIFTCALL_REQ => LiftCallReq,
            msg::LIFTCALL_RES => LiftCallRes,
            msg::LIFTSTATUS_REQ => LiftStatusReq,
            msg::LIFTSTATUS_RES => LiftStatusRes,
            msg::FIRE_ALERT => FireAlert,
            msg::SET_VIRTINP => SetVirtInp,
            _ => return None,
        };
        Some(ty)
    }

    /// Minimum record length, header included
    pub fn min_len(self) -> usize {
        use MessageType::*;
        match self {
            Start => call::START_LEN_BASE,
            Proceeding | Connect => HEADER_LEN,
            Alerting => 3,
            Release => call::RELEASE_LEN_BASE,
            CapabReport => call::CAPAB_LEN_BASE,
            MediaReq | MediaOffer => media::MEDIA_LEN_BASE,
            OpenDoor => 4,
            SetOutput => 5,
            SetOutput2 => 14,
            DoorStatus => 5,
            RegisterReq | RegisterRenew => 13,
            RegisterRes => 5,
            CaptureAdd => 22,
            CaptureUpdate => 6,
            CaptureRes => 5,
            ServiceAction | ServiceStatus => 4,
            VoiceStatus => 3,
            LiftLandReq => 4,
            LiftLandRes => 5,
            LiftCallReq => 5,
            LiftCallRes => 4,
            LiftStatusReq => 3,
            LiftStatusRes => 6,
            FireAlert => 5,
            SetVirtInp => 4,
        }
    }

    /// Protocol name used in logs
    pub fn name(self) -> &'static str {
        use MessageType::*;
        match self {
            Start => "START",
            Proceeding => "PROCEEDING",
            Alerting => "ALERTING",
            Connect => "CONNECT",
            Release => "RELEASE",
            CapabReport => "CAPAB_REPORT",
            MediaReq => "MEDIAREQ",
            MediaOffer => "MEDIAOFFER",
            OpenDoor => "OPENDOOR",
            SetOutput => "SETOUTPUT",
            SetOutput2 => "SETOUTPUT2",
            DoorStatus => "DOORSTATUS",
            RegisterReq => "REGISTER_REQ",
            RegisterRes => "REGISTER_RES",
            RegisterRenew => "REGISTER_RENEW",
            CaptureAdd => "CAPTURE_ADD",
            CaptureUpdate => "CAPTURE_UPDATE",
            CaptureRes => "CAPTURE_RES",
            ServiceAction => "SERVICE_ACTION",
            ServiceStatus => "SERVICE_STATUS",
            VoiceStatus => "VOICESTATUS",
            LiftLandReq => "LIFTLAND_REQ",
            LiftLandRes => "LIFTLAND_RES",
            LiftCallReq => "LIFTCALL_REQ",
            LiftCallRes => "LIFTCALL_RES",
            LiftStatusReq => "LIFTSTATUS_REQ",
            LiftStatusRes => "LIFTSTATUS_RES",
            FireAlert => "FIRE_ALERT",
            SetVirtInp => "SET_VIRTINP",
        }
    }
}

/// A decoded CSP record
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Start(StartMessage),
    Proceeding,
    Alerting(AlertingMessage),
    Connect,
    Release(ReleaseMessage),
    CapabReport(CapabReportMessage),
    MediaReq(MediaMessage),
    MediaOffer(MediaMessage),
    OpenDoor(OpenDoorMessage),
    SetOutput(SetOutputMessage),
    SetOutput2(SetOutput2Message),
    DoorStatus(DoorStatusMessage),
    RegisterReq(RegisterMessage),
    RegisterRes(RegisterResMessage),
    RegisterRenew(RegisterMessage),
    CaptureAdd(CaptureAddMessage),
    CaptureUpdate(CaptureUpdateMessage),
    CaptureRes(CaptureResMessage),
    ServiceAction(ServiceActionMessage),
    ServiceStatus(ServiceStatusMessage),
    VoiceStatus(VoiceStatusMessage),
    LiftLandReq(LiftLandReqMessage),
    LiftLandRes(LiftLandResMessage),
    LiftCallReq(LiftCallReqMessage),
    LiftCallRes(LiftCallResMessage),
    LiftStatusReq(LiftStatusReqMessage),
    LiftStatusRes(LiftStatusResMessage),
    FireAlert(FireAlertMessage),
    SetVirtInp(SetVirtInpMessage),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Start(_) => MessageType::Start,
            Message::Proceeding => MessageType::Proceeding,
            Message::Alerting(_) => MessageType::Alerting,
            Message::Connect => MessageType::Connect,
            Message::Release(_) => MessageType::Release,
            Message::CapabReport(_) => MessageType::CapabReport,
            Message::MediaReq(_) => MessageType::MediaReq,
            Message::MediaOffer(_) => MessageType::MediaOffer,
            Message::OpenDoor(_) => MessageType::OpenDoor,
            Message::SetOutput(_) => MessageType::SetOutput,
            Message::SetOutput2(_) => MessageType::SetOutput2,
            Message::DoorStatus(_) => MessageType::DoorStatus,
            Message::RegisterReq(_) => MessageType::RegisterReq,
            Message::RegisterRes(_) => MessageType::RegisterRes,
            Message::RegisterRenew(_) => MessageType::RegisterRenew,
            Message::CaptureAdd(_) => MessageType::CaptureAdd,
            Message::CaptureUpdate(_) => MessageType::CaptureUpdate,
            Message::CaptureRes(_) => MessageType::CaptureRes,
            Message::ServiceAction(_) => MessageType::ServiceAction,
            Message::ServiceStatus(_) => MessageType::ServiceStatus,
            Message::VoiceStatus(_) => MessageType::VoiceStatus,
            Message::LiftLandReq(_) => MessageType::LiftLandReq,
            Message::LiftLandRes(_) => MessageType::LiftLandRes,
            Message::LiftCallReq(_) => MessageType::LiftCallReq,
            Message::LiftCallRes(_) => MessageType::LiftCallRes,
            Message::LiftStatusReq(_) => MessageType::LiftStatusReq,
            Message::LiftStatusRes(_) => MessageType::LiftStatusRes,
            Message::FireAlert(_) => MessageType::FireAlert,
            Message::SetVirtInp(_) => MessageType::SetVirtInp,
        }
    }

    /// True for the messages that drive the call state machine
    pub fn is_call_control(&self) -> bool {
        matches!(
            self,
            Message::Start(_)
                | Message::Proceeding
                | Message::Alerting(_)
                | Message::Connect
                | Message::Release(_)
        )
    }
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// Encode a record, header included
pub fn encode(message: &Message) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(RESERVED);
    buf.put_u8(message.message_type() as u8);

    match message {
        Message::Start(m) => m.encode(&mut buf),
        Message::Proceeding | Message::Connect => {}
        Message::Alerting(m) => m.encode(&mut buf),
        Message::Release(m) => m.encode(&mut buf),
        Message::CapabReport(m) => m.encode(&mut buf),
        Message::MediaReq(m) | Message::MediaOffer(m) => m.encode(&mut buf),
        Message::OpenDoor(m) => m.encode(&mut buf),
        Message::SetOutput(m) => m.encode(&mut buf),
        Message::SetOutput2(m) => m.encode(&mut buf),
        Message::DoorStatus(m) => m.encode(&mut buf),
        Message::RegisterReq(m) | Message::RegisterRenew(m) => m.encode(&mut buf),
        Message::RegisterRes(m) => m.encode(&mut buf),
        Message::CaptureAdd(m) => m.encode(&mut buf),
        Message::CaptureUpdate(m) => m.encode(&mut buf),
        Message::CaptureRes(m) => m.encode(&mut buf),
        Message::ServiceAction(m) => m.encode(&mut buf),
        Message::ServiceStatus(m) => m.encode(&mut buf),
        Message::VoiceStatus(m) => m.encode(&mut buf),
        Message::LiftLandReq(m) => m.encode(&mut buf),
        Message::LiftLandRes(m) => m.encode(&mut buf),
        Message::LiftCallReq(m) => m.encode(&mut buf),
        Message::LiftCallRes(m) => m.encode(&mut buf),
        Message::LiftStatusReq(m) => m.encode(&mut buf),
        Message::LiftStatusRes(m) => m.encode(&mut buf),
        Message::FireAlert(m) => m.encode(&mut buf),
        Message::SetVirtInp(m) => m.encode(&mut buf),
    }

    if buf.len() > MAX_CSP_SIZE {
        return Err(Error::PayloadTooLarge(buf.len()));
    }
    Ok(buf.freeze())
}

/// Decode a record, validating its length against the minimum-length table
pub fn decode(bytes: &[u8]) -> Result<Message> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::BufferTooSmall {
            needed: HEADER_LEN,
            have: bytes.len(),
        });
    }

    let code = bytes[1];
    let msg_type = MessageType::from_u8(code).ok_or(Error::UnknownMessageType(code))?;
    let needed = msg_type.min_len();
    if bytes.len() < needed {
        return Err(Error::TooShort {
            msg_type: code,
            needed,
            have: bytes.len(),
        });
    }

    let len = bytes.len();
    let mut buf = &bytes[HEADER_LEN..];
    let buf = &mut buf;

    use MessageType as T;
    let message = match msg_type {
        T::Start => Message::Start(StartMessage::decode(buf, len)?),
        T::Proceeding => Message::Proceeding,
        T::Alerting => Message::Alerting(AlertingMessage::decode(buf)),
        T::Connect => Message::Connect,
        T::Release => Message::Release(ReleaseMessage::decode(buf, len)?),
        T::CapabReport => Message::CapabReport(CapabReportMessage::decode(buf, len)),
        T::MediaReq => Message::MediaReq(MediaMessage::decode(buf, len)?),
        T::MediaOffer => Message::MediaOffer(MediaMessage::decode(buf, len)?),
        T::OpenDoor => Message::OpenDoor(OpenDoorMessage::decode(buf, len)),
        T::SetOutput => Message::SetOutput(SetOutputMessage::decode(buf, len)?),
        T::SetOutput2 => Message::SetOutput2(SetOutput2Message::decode(buf, len)?),
        T::DoorStatus => Message::DoorStatus(DoorStatusMessage::decode(buf)),
        T::RegisterReq => Message::RegisterReq(RegisterMessage::decode(buf)),
        T::RegisterRes => Message::RegisterRes(RegisterResMessage::decode(buf)?),
        T::RegisterRenew => Message::RegisterRenew(RegisterMessage::decode(buf)),
        T::CaptureAdd => Message::CaptureAdd(CaptureAddMessage::decode(buf)?),
        T::CaptureUpdate => Message::CaptureUpdate(CaptureUpdateMessage::decode(buf)),
        T::CaptureRes => Message::CaptureRes(CaptureResMessage::decode(buf)?),
        T::ServiceAction => Message::ServiceAction(ServiceActionMessage::decode(buf, len)?),
        T::ServiceStatus => Message::ServiceStatus(ServiceStatusMessage::decode(buf, len)),
        T::VoiceStatus => Message::VoiceStatus(VoiceStatusMessage::decode(buf, len)?),
        T::LiftLandReq => Message::LiftLandReq(LiftLandReqMessage::decode(buf)),
        T::LiftLandRes => Message::LiftLandRes(LiftLandResMessage::decode(buf)),
        T::LiftCallReq => Message::LiftCallReq(LiftCallReqMessage::decode(buf, len)?),
        T::LiftCallRes => Message::LiftCallRes(LiftCallResMessage::decode(buf)),
        T::LiftStatusReq => Message::LiftStatusReq(LiftStatusReqMessage::decode(buf)),
        T::LiftStatusRes => Message::LiftStatusRes(LiftStatusResMessage::decode(buf, len)?),
        T::FireAlert => Message::FireAlert(FireAlertMessage::decode(buf, len)?),
        T::SetVirtInp => Message::SetVirtInp(SetVirtInpMessage::decode(buf, len)),
    };

    Ok(message)
}

/// Decode a received record, discarding anything unknown or malformed
pub fn parse(bytes: &[u8]) -> Option<Message> {
    match decode(bytes) {
        Ok(message) => Some(message),
        Err(e) => {
            trace!("discarding CSP record ({} bytes): {}", bytes.len(), e);
            None
        }
    }
}

// ============================================================================
// FIELD HELPERS
// ============================================================================

/// Consume the rest of the record as UTF-8 text
pub(crate) fn read_text(buf: &mut &[u8]) -> Result<String> {
    let text = std::str::from_utf8(buf)
        .map_err(|e| Error::Malformed(format!("text field: {}", e)))?
        .to_string();
    *buf = &[];
    Ok(text)
}

/// Zero-valued optional fields are encoded as "unset"
pub(crate) fn non_zero_u16(value: u16) -> Option<u16> {
    (value != 0).then_some(value)
}

pub(crate) fn malformed(what: &str, value: u8) -> Error {
    Error::Malformed(format!("{} 0x{:02x}", what, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_only_messages() {
        let encoded = encode(&Message::Connect).unwrap();
        assert_eq!(encoded.as_ref(), &[RESERVED, msg::CONNECT]);
        assert_eq!(decode(&encoded).unwrap(), Message::Connect);
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(decode(&[0, 0xEE]), Err(Error::UnknownMessageType(0xEE)));
        assert!(parse(&[0, 0xEE]).is_none());
    }

    #[test]
    fn test_too_short_is_rejected() {
        let err = decode(&[0, msg::ALERTING]).unwrap_err();
        assert_eq!(
            err,
            Error::TooShort {
                msg_type: msg::ALERTING,
                needed: 3,
                have: 2
            }
        );
    }

    #[test]
    fn test_min_len_covers_every_type() {
        for code in 0..=u8::MAX {
            if let Some(ty) = MessageType::from_u8(code) {
                assert_eq!(ty as u8, code);
                assert!(ty.min_len() >= HEADER_LEN, "{}", ty.name());
            }
        }
    }
}

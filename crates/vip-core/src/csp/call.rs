//! Call control records: START, ALERTING, RELEASE, CAPAB_REPORT
//!
//! START layout:
//! ```text
//! 0      2        11       20    21     22       23    24        28
//! ├ hdr ─┼ from ───┼ to ─────┼ type┼ flags┼ prio ──┼ rsv ┼ call id ┤  base (28)
//! 28                       37     38    40
//! ├ forwarder address ─────┼ role ┼ rsv ┤                           forwarded (40)
//! 40          41
//! ├ media hint┤                                                     media (41)
//! 41          42
//! ├ ext kind  ┼ ext data (N bytes, to end of record) ┤              extended (42+N)
//! ```

use super::{malformed, read_text};
use crate::address::WIRE_LEN;
use crate::{Error, LogicalAddress, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const START_LEN_BASE: usize = 28;
pub const START_LEN_FORWARDED: usize = 40;
pub const START_LEN_MEDIA: usize = 41;
pub const START_LEN_EXTENDED: usize = 42;

pub const RELEASE_LEN_BASE: usize = 3;
pub const RELEASE_LEN_DIVERTED: usize = RELEASE_LEN_BASE + WIRE_LEN;

pub const CAPAB_LEN_BASE: usize = 10;
pub const CAPAB_LEN_STREAMS: usize = 11;

/// START flag bits
const FLAG_DIVERTED: u8 = 0x01;
const FLAG_GROUP: u8 = 0x02;
const FLAG_PRIORITY: u8 = 0x04;

/// Extension kinds carried at offset 41
mod ext {
    pub const MEMO_PLAYBACK: u8 = 1;
    pub const SPECIFIC_USER: u8 = 2;
    pub const SPECIFIC_SLAVE: u8 = 3;
    pub const TECHNICAL_MESSAGE: u8 = 4;
}

/// Call type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CallType {
    #[default]
    Normal = 0,
    Intercom = 1,
    Tvcc = 2,
    Test = 3,
    Cfp = 4,
    Vip = 5,
}

impl CallType {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(CallType::Normal),
            1 => Some(CallType::Intercom),
            2 => Some(CallType::Tvcc),
            3 => Some(CallType::Test),
            4 => Some(CallType::Cfp),
            5 => Some(CallType::Vip),
            _ => None,
        }
    }
}

/// Role of the unit that forwarded a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderRole {
    Divert,
    Transfer,
    FollowMe,
    Other(u8),
}

impl ForwarderRole {
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => ForwarderRole::Divert,
            2 => ForwarderRole::Transfer,
            3 => ForwarderRole::FollowMe,
            other => ForwarderRole::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ForwarderRole::Divert => 1,
            ForwarderRole::Transfer => 2,
            ForwarderRole::FollowMe => 3,
            ForwarderRole::Other(v) => v,
        }
    }
}

/// Unit that forwarded the call to the callee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Forwarder {
    pub address: LogicalAddress,
    pub role: ForwarderRole,
}

/// Media the caller intends to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaHint(pub u8);

impl MediaHint {
    pub const AUDIO: u8 = 0x01;
    pub const VIDEO: u8 = 0x02;

    pub fn audio_video() -> Self {
        MediaHint(Self::AUDIO | Self::VIDEO)
    }

    pub fn has_audio(&self) -> bool {
        self.0 & Self::AUDIO != 0
    }

    pub fn has_video(&self) -> bool {
        self.0 & Self::VIDEO != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Trailing START extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartExtension {
    /// Play back a recorded memo
    MemoPlayback(u32),
    /// Ring one user of a multi-user apartment
    SpecificUser(u32),
    /// Ring one slave device
    SpecificSlave(u8),
    /// Free-form technical message
    TechnicalMessage(String),
    /// Extension kind this build does not interpret
    Other { kind: u8, data: Bytes },
}

impl StartExtension {
    fn kind(&self) -> u8 {
        match self {
            StartExtension::MemoPlayback(_) => ext::MEMO_PLAYBACK,
            StartExtension::SpecificUser(_) => ext::SPECIFIC_USER,
            StartExtension::SpecificSlave(_) => ext::SPECIFIC_SLAVE,
            StartExtension::TechnicalMessage(_) => ext::TECHNICAL_MESSAGE,
            StartExtension::Other { kind, .. } => *kind,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind());
        match self {
            StartExtension::MemoPlayback(id) | StartExtension::SpecificUser(id) => buf.put_u32(*id),
            StartExtension::SpecificSlave(id) => buf.put_u8(*id),
            StartExtension::TechnicalMessage(text) => buf.put_slice(text.as_bytes()),
            StartExtension::Other { data, .. } => buf.put_slice(data),
        }
    }

    fn decode(kind: u8, buf: &mut &[u8]) -> Result<Self> {
        let remaining = buf.remaining();
        let need = |n: usize| {
            if remaining < n {
                Err(Error::Malformed(format!(
                    "START extension {} needs {} bytes, has {}",
                    kind, n, remaining
                )))
            } else {
                Ok(())
            }
        };
        let extension = match kind {
            ext::MEMO_PLAYBACK => {
                need(4)?;
                StartExtension::MemoPlayback(buf.get_u32())
            }
            ext::SPECIFIC_USER => {
                need(4)?;
                StartExtension::SpecificUser(buf.get_u32())
            }
            ext::SPECIFIC_SLAVE => {
                need(1)?;
                StartExtension::SpecificSlave(buf.get_u8())
            }
            ext::TECHNICAL_MESSAGE => StartExtension::TechnicalMessage(read_text(buf)?),
            _ => StartExtension::Other {
                kind,
                data: buf.copy_to_bytes(buf.remaining()),
            },
        };
        Ok(extension)
    }
}

/// Which optional START fields a record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StartLayout {
    Base,
    Forwarded,
    Media,
    Extended,
}

impl StartLayout {
    /// Layout implied by a received record length
    pub fn from_len(len: usize) -> Self {
        if len >= START_LEN_EXTENDED {
            StartLayout::Extended
        } else if len >= START_LEN_MEDIA {
            StartLayout::Media
        } else if len >= START_LEN_FORWARDED {
            StartLayout::Forwarded
        } else {
            StartLayout::Base
        }
    }
}

/// START: open a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartMessage {
    pub from: LogicalAddress,
    pub to: LogicalAddress,
    pub call_type: CallType,
    pub call_id: u32,
    pub priority: u8,
    pub priority_call: bool,
    pub diverted: bool,
    pub group: bool,
    pub forwarder: Option<Forwarder>,
    pub media: MediaHint,
    pub extension: Option<StartExtension>,
}

impl StartMessage {
    /// Minimal START with only the mandatory fields set
    pub fn new(from: LogicalAddress, to: LogicalAddress, call_type: CallType, call_id: u32) -> Self {
        Self {
            from,
            to,
            call_type,
            call_id,
            priority: 0,
            priority_call: false,
            diverted: false,
            group: false,
            forwarder: None,
            media: MediaHint::default(),
            extension: None,
        }
    }

    pub fn with_forwarder(mut self, address: LogicalAddress, role: ForwarderRole) -> Self {
        self.forwarder = Some(Forwarder { address, role });
        self
    }

    pub fn with_media(mut self, media: MediaHint) -> Self {
        self.media = media;
        self
    }

    pub fn with_extension(mut self, extension: StartExtension) -> Self {
        self.extension = Some(extension);
        self
    }

    /// Smallest layout able to carry every set field
    pub fn layout(&self) -> StartLayout {
        if self.extension.is_some() {
            StartLayout::Extended
        } else if !self.media.is_empty() {
            StartLayout::Media
        } else if self.forwarder.is_some() {
            StartLayout::Forwarded
        } else {
            StartLayout::Base
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.from.write(buf);
        self.to.write(buf);
        buf.put_u8(self.call_type as u8);

        let mut flags = 0u8;
        if self.diverted {
            flags |= FLAG_DIVERTED;
        }
        if self.group {
            flags |= FLAG_GROUP;
        }
        if self.priority_call {
            flags |= FLAG_PRIORITY;
        }
        buf.put_u8(flags);
        buf.put_u8(self.priority);
        buf.put_u8(0);
        buf.put_u32(self.call_id);

        let layout = self.layout();
        if layout >= StartLayout::Forwarded {
            // Unassigned forwarder reads back as "none"
            let (address, role) = match self.forwarder {
                Some(f) => (f.address, f.role.to_u8()),
                None => (LogicalAddress::UNASSIGNED, 0),
            };
            address.write(buf);
            buf.put_u8(role);
            buf.put_u16(0);
        }
        if layout >= StartLayout::Media {
            buf.put_u8(self.media.0);
        }
        if let Some(ref extension) = self.extension {
            extension.encode(buf);
        }
    }

    pub(crate) fn decode(buf: &mut &[u8], len: usize) -> Result<Self> {
        let from = LogicalAddress::read(buf);
        let to = LogicalAddress::read(buf);
        let type_code = buf.get_u8();
        let call_type = CallType::from_u8(type_code).ok_or_else(|| malformed("call type", type_code))?;
        let flags = buf.get_u8();
        let priority = buf.get_u8();
        let _reserved = buf.get_u8();
        let call_id = buf.get_u32();

        let mut message = StartMessage {
            from,
            to,
            call_type,
            call_id,
            priority,
            priority_call: flags & FLAG_PRIORITY != 0,
            diverted: flags & FLAG_DIVERTED != 0,
            group: flags & FLAG_GROUP != 0,
            forwarder: None,
            media: MediaHint::default(),
            extension: None,
        };

        let layout = StartLayout::from_len(len);
        if layout >= StartLayout::Forwarded {
            let address = LogicalAddress::read(buf);
            let role = buf.get_u8();
            buf.advance(2);
            if !address.is_unassigned() {
                message.forwarder = Some(Forwarder {
                    address,
                    role: ForwarderRole::from_u8(role),
                });
            }
        }
        if layout >= StartLayout::Media {
            message.media = MediaHint(buf.get_u8());
        }
        if layout >= StartLayout::Extended {
            let kind = buf.get_u8();
            message.extension = Some(StartExtension::decode(kind, buf)?);
        }

        Ok(message)
    }
}

/// Why the callee is alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    Ringing,
    Queued,
    Forwarded,
    Other(u8),
}

impl AlertType {
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => AlertType::Ringing,
            1 => AlertType::Queued,
            2 => AlertType::Forwarded,
            other => AlertType::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            AlertType::Ringing => 0,
            AlertType::Queued => 1,
            AlertType::Forwarded => 2,
            AlertType::Other(v) => v,
        }
    }
}

/// ALERTING: callee is ringing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertingMessage {
    pub alert: AlertType,
}

impl AlertingMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.alert.to_u8());
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Self {
        Self {
            alert: AlertType::from_u8(buf.get_u8()),
        }
    }
}

/// RELEASE cause codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseCause {
    Normal,
    Busy,
    Rejected,
    /// Call diverted to another address
    Diverted(LogicalAddress),
    NoUser,
    NoDevice,
    SystemBusy,
    Unsupported,
    Malformed,
    InternalError,
    GenericFailure,
}

impl ReleaseCause {
    const DIVERTED: u8 = 3;

    pub fn code(&self) -> u8 {
        match self {
            ReleaseCause::Normal => 0,
            ReleaseCause::Busy => 1,
            ReleaseCause::Rejected => 2,
            ReleaseCause::Diverted(_) => Self::DIVERTED,
            ReleaseCause::NoUser => 4,
            ReleaseCause::NoDevice => 5,
            ReleaseCause::SystemBusy => 6,
            ReleaseCause::Unsupported => 7,
            ReleaseCause::Malformed => 8,
            ReleaseCause::InternalError => 9,
            ReleaseCause::GenericFailure => 10,
        }
    }

    /// Cause for a code other than DIVERTED; unknown codes map to a generic failure
    fn from_code(code: u8) -> Self {
        match code {
            0 => ReleaseCause::Normal,
            1 => ReleaseCause::Busy,
            2 => ReleaseCause::Rejected,
            4 => ReleaseCause::NoUser,
            5 => ReleaseCause::NoDevice,
            6 => ReleaseCause::SystemBusy,
            7 => ReleaseCause::Unsupported,
            8 => ReleaseCause::Malformed,
            9 => ReleaseCause::InternalError,
            _ => ReleaseCause::GenericFailure,
        }
    }
}

/// RELEASE: terminate a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseMessage {
    pub cause: ReleaseCause,
}

impl ReleaseMessage {
    pub fn new(cause: ReleaseCause) -> Self {
        Self { cause }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.cause.code());
        if let ReleaseCause::Diverted(target) = self.cause {
            target.write(buf);
        }
    }

    pub(crate) fn decode(buf: &mut &[u8], len: usize) -> Result<Self> {
        let code = buf.get_u8();
        let cause = if code == ReleaseCause::DIVERTED {
            if len < RELEASE_LEN_DIVERTED {
                return Err(Error::Malformed(
                    "diverted RELEASE without target".to_string(),
                ));
            }
            ReleaseCause::Diverted(LogicalAddress::read(buf))
        } else {
            ReleaseCause::from_code(code)
        };
        Ok(Self { cause })
    }
}

/// Exported capability bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(pub u32);

impl Capabilities {
    pub const AUDIO_TX: u32 = 0x0001;
    pub const AUDIO_RX: u32 = 0x0002;
    pub const VIDEO_TX: u32 = 0x0004;
    pub const VIDEO_RX: u32 = 0x0008;
    pub const OPEN_DOOR: u32 = 0x0010;
    pub const MULTI_STREAM: u32 = 0x0020;

    pub fn contains(&self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    pub fn with(self, bits: u32) -> Self {
        Capabilities(self.0 | bits)
    }

    /// Capabilities both peers share
    pub fn intersect(self, other: Capabilities) -> Self {
        Capabilities(self.0 & other.0)
    }
}

/// Role a unit plays in the installation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitRole {
    OutdoorStation,
    IndoorStation,
    Switchboard,
    Gateway,
    Other(u8),
}

impl UnitRole {
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => UnitRole::OutdoorStation,
            2 => UnitRole::IndoorStation,
            3 => UnitRole::Switchboard,
            4 => UnitRole::Gateway,
            other => UnitRole::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            UnitRole::OutdoorStation => 1,
            UnitRole::IndoorStation => 2,
            UnitRole::Switchboard => 3,
            UnitRole::Gateway => 4,
            UnitRole::Other(v) => v,
        }
    }
}

/// CAPAB_REPORT: what this peer can do in the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabReportMessage {
    pub capabilities: Capabilities,
    pub role: UnitRole,
    /// One bit per door key that is locked
    pub keylock_map: u16,
    pub max_streams: Option<u8>,
}

impl CapabReportMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.capabilities.0);
        buf.put_u8(self.role.to_u8());
        buf.put_u8(0);
        buf.put_u16(self.keylock_map);
        if let Some(streams) = self.max_streams {
            buf.put_u8(streams);
        }
    }

    pub(crate) fn decode(buf: &mut &[u8], len: usize) -> Self {
        let capabilities = Capabilities(buf.get_u32());
        let role = UnitRole::from_u8(buf.get_u8());
        let _reserved = buf.get_u8();
        let keylock_map = buf.get_u16();
        let max_streams = (len >= CAPAB_LEN_STREAMS).then(|| buf.get_u8());
        Self {
            capabilities,
            role,
            keylock_map,
            max_streams,
        }
    }
}

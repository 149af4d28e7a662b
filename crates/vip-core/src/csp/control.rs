//! Door, output and voice control records

use super::{malformed, non_zero_u16};
use crate::{LogicalAddress, Result};
use bytes::{Buf, BufMut, BytesMut};

const OPENDOOR_LEN_DURATION: usize = 6;
const SETOUTPUT_LEN_DURATION: usize = 7;
const SETOUTPUT2_LEN_DURATION: usize = 16;
const VOICESTATUS_LEN_VOLUME: usize = 4;
const SET_VIRTINP_LEN_DURATION: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputState {
    Off = 0,
    On = 1,
    Toggle = 2,
}

impl OutputState {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(OutputState::Off),
            1 => Some(OutputState::On),
            2 => Some(OutputState::Toggle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorState {
    Closed,
    Open,
    Forced,
    Ajar,
    Unknown,
}

impl DoorState {
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => DoorState::Closed,
            1 => DoorState::Open,
            2 => DoorState::Forced,
            3 => DoorState::Ajar,
            _ => DoorState::Unknown,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            DoorState::Closed => 0,
            DoorState::Open => 1,
            DoorState::Forced => 2,
            DoorState::Ajar => 3,
            DoorState::Unknown => 0xFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VoiceState {
    Idle = 0,
    Talking = 1,
    Listening = 2,
    Muted = 3,
}

impl VoiceState {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(VoiceState::Idle),
            1 => Some(VoiceState::Talking),
            2 => Some(VoiceState::Listening),
            3 => Some(VoiceState::Muted),
            _ => None,
        }
    }
}

fn put_duration(buf: &mut BytesMut, duration: Option<u16>) {
    if let Some(secs) = duration {
        buf.put_u16(secs);
    }
}

fn get_duration(buf: &mut &[u8], len: usize, min: usize) -> Option<u16> {
    if len >= min {
        non_zero_u16(buf.get_u16())
    } else {
        None
    }
}

/// OPENDOOR: pulse a door lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenDoorMessage {
    pub module: u8,
    pub index: u8,
    /// Seconds; the device default applies when unset
    pub duration: Option<u16>,
}

impl OpenDoorMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.module);
        buf.put_u8(self.index);
        put_duration(buf, self.duration);
    }

    pub(crate) fn decode(buf: &mut &[u8], len: usize) -> Self {
        Self {
            module: buf.get_u8(),
            index: buf.get_u8(),
            duration: get_duration(buf, len, OPENDOOR_LEN_DURATION),
        }
    }
}

/// SETOUTPUT: drive a local relay output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOutputMessage {
    pub module: u8,
    pub index: u8,
    pub state: OutputState,
    pub duration: Option<u16>,
}

impl SetOutputMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.module);
        buf.put_u8(self.index);
        buf.put_u8(self.state as u8);
        put_duration(buf, self.duration);
    }

    pub(crate) fn decode(buf: &mut &[u8], len: usize) -> Result<Self> {
        let module = buf.get_u8();
        let index = buf.get_u8();
        let code = buf.get_u8();
        let state = OutputState::from_u8(code).ok_or_else(|| malformed("output state", code))?;
        Ok(Self {
            module,
            index,
            state,
            duration: get_duration(buf, len, SETOUTPUT_LEN_DURATION),
        })
    }
}

/// SETOUTPUT2: drive an output on another device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOutput2Message {
    pub target: LogicalAddress,
    pub module: u8,
    pub index: u8,
    pub state: OutputState,
    pub duration: Option<u16>,
}

impl SetOutput2Message {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.target.write(buf);
        buf.put_u8(self.module);
        buf.put_u8(self.index);
        buf.put_u8(self.state as u8);
        put_duration(buf, self.duration);
    }

    pub(crate) fn decode(buf: &mut &[u8], len: usize) -> Result<Self> {
        let target = LogicalAddress::read(buf);
        let module = buf.get_u8();
        let index = buf.get_u8();
        let code = buf.get_u8();
        let state = OutputState::from_u8(code).ok_or_else(|| malformed("output state", code))?;
        Ok(Self {
            target,
            module,
            index,
            state,
            duration: get_duration(buf, len, SETOUTPUT2_LEN_DURATION),
        })
    }
}

/// DOORSTATUS: report a door sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorStatusMessage {
    pub module: u8,
    pub index: u8,
    pub state: DoorState,
}

impl DoorStatusMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.module);
        buf.put_u8(self.index);
        buf.put_u8(self.state.to_u8());
    }

    pub(crate) fn decode(buf: &mut &[u8]) -> Self {
        Self {
            module: buf.get_u8(),
            index: buf.get_u8(),
            state: DoorState::from_u8(buf.get_u8()),
        }
    }
}

/// VOICESTATUS: half-duplex voice direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceStatusMessage {
    pub state: VoiceState,
    pub volume: Option<u8>,
}

impl VoiceStatusMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.state as u8);
        if let Some(volume) = self.volume {
            buf.put_u8(volume);
        }
    }

    pub(crate) fn decode(buf: &mut &[u8], len: usize) -> Result<Self> {
        let code = buf.get_u8();
        let state = VoiceState::from_u8(code).ok_or_else(|| malformed("voice state", code))?;
        let volume = (len >= VOICESTATUS_LEN_VOLUME).then(|| buf.get_u8());
        Ok(Self { state, volume })
    }
}

/// SET_VIRTINP: assert a virtual input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetVirtInpMessage {
    pub input: u8,
    pub active: bool,
    pub duration: Option<u16>,
}

impl SetVirtInpMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.input);
        buf.put_u8(self.active as u8);
        put_duration(buf, self.duration);
    }

    pub(crate) fn decode(buf: &mut &[u8], len: usize) -> Self {
        Self {
            input: buf.get_u8(),
            active: buf.get_u8() != 0,
            duration: get_duration(buf, len, SET_VIRTINP_LEN_DURATION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csp::{decode, encode, msg, Message};

    #[test]
    fn test_opendoor_without_duration() {
        let decoded = decode(&[0, msg::OPENDOOR, 1, 2]).unwrap();
        assert_eq!(
            decoded,
            Message::OpenDoor(OpenDoorMessage {
                module: 1,
                index: 2,
                duration: None
            })
        );
    }

    #[test]
    fn test_opendoor_with_duration() {
        let open = OpenDoorMessage {
            module: 0,
            index: 1,
            duration: Some(5),
        };
        let encoded = encode(&Message::OpenDoor(open)).unwrap();
        assert_eq!(encoded.len(), OPENDOOR_LEN_DURATION);
        assert_eq!(decode(&encoded).unwrap(), Message::OpenDoor(open));
    }

    #[test]
    fn test_bad_output_state() {
        assert!(decode(&[0, msg::SETOUTPUT, 0, 0, 7]).is_err());
    }

    #[test]
    fn test_unknown_door_state_is_tolerated() {
        match decode(&[0, msg::DOORSTATUS, 1, 1, 0x42]).unwrap() {
            Message::DoorStatus(status) => assert_eq!(status.state, DoorState::Unknown),
            other => panic!("expected DOORSTATUS, got {:?}", other),
        }
    }
}

//! Per-device services: extra addresses, memo, absence message, call forward

use super::{malformed, read_text};
use crate::address::WIRE_LEN;
use crate::{LogicalAddress, Result};
use bytes::{Buf, BufMut, BytesMut};

const SERVICE_LEN_BASE: usize = 4;
const SERVICE_LEN_ADDRESS: usize = SERVICE_LEN_BASE + WIRE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    AdditionalAddress,
    Memo,
    AbsentMessage,
    CallForward,
    Other(u8),
}

impl ServiceKind {
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => ServiceKind::AdditionalAddress,
            2 => ServiceKind::Memo,
            3 => ServiceKind::AbsentMessage,
            4 => ServiceKind::CallForward,
            other => ServiceKind::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ServiceKind::AdditionalAddress => 1,
            ServiceKind::Memo => 2,
            ServiceKind::AbsentMessage => 3,
            ServiceKind::CallForward => 4,
            ServiceKind::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceCommand {
    Activate = 1,
    Deactivate = 2,
    GetStatus = 3,
}

impl ServiceCommand {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(ServiceCommand::Activate),
            2 => Some(ServiceCommand::Deactivate),
            3 => Some(ServiceCommand::GetStatus),
            _ => None,
        }
    }
}

/// Coarse meaning of a service status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBand {
    /// 0x00..=0x3F
    Inactive,
    /// 0x40..=0x7F, on its way up or down
    Transient,
    /// 0x80..=0xBF
    Active,
    /// 0xC0..=0xFF, failed and retrying
    ErrorRetrying,
}

/// Raw service status code; only the top two bits carry the band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStatus(pub u8);

impl ServiceStatus {
    pub const INACTIVE: ServiceStatus = ServiceStatus(0x00);
    pub const ACTIVATING: ServiceStatus = ServiceStatus(0x40);
    pub const ACTIVE: ServiceStatus = ServiceStatus(0x80);
    pub const RETRYING: ServiceStatus = ServiceStatus(0xC0);

    pub fn band(&self) -> StatusBand {
        match self.0 >> 6 {
            0 => StatusBand::Inactive,
            1 => StatusBand::Transient,
            2 => StatusBand::Active,
            _ => StatusBand::ErrorRetrying,
        }
    }

    pub fn is_active(&self) -> bool {
        self.band() == StatusBand::Active
    }
}

/// SERVICE_ACTION
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceActionMessage {
    pub service: ServiceKind,
    pub command: ServiceCommand,
    /// Extra address, forward target, and so on
    pub address: Option<LogicalAddress>,
    /// Absence message text; only sent together with an address slot
    pub text: Option<String>,
}

impl ServiceActionMessage {
    pub fn new(service: ServiceKind, command: ServiceCommand) -> Self {
        Self {
            service,
            command,
            address: None,
            text: None,
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.service.to_u8());
        buf.put_u8(self.command as u8);
        if self.address.is_some() || self.text.is_some() {
            self.address.unwrap_or(LogicalAddress::UNASSIGNED).write(buf);
        }
        if let Some(ref text) = self.text {
            buf.put_slice(text.as_bytes());
        }
    }

    pub(crate) fn decode(buf: &mut &[u8], len: usize) -> Result<Self> {
        let service = ServiceKind::from_u8(buf.get_u8());
        let code = buf.get_u8();
        let command = ServiceCommand::from_u8(code).ok_or_else(|| malformed("service command", code))?;
        let mut message = Self::new(service, command);

        if len >= SERVICE_LEN_ADDRESS {
            let address = LogicalAddress::read(buf);
            message.address = (!address.is_unassigned()).then_some(address);
        }
        if len > SERVICE_LEN_ADDRESS {
            message.text = Some(read_text(buf)?);
        }
        Ok(message)
    }
}

/// SERVICE_STATUS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStatusMessage {
    pub service: ServiceKind,
    pub status: ServiceStatus,
    pub address: Option<LogicalAddress>,
}

impl ServiceStatusMessage {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.service.to_u8());
        buf.put_u8(self.status.0);
        if let Some(address) = self.address {
            address.write(buf);
        }
    }

    pub(crate) fn decode(buf: &mut &[u8], len: usize) -> Self {
        let service = ServiceKind::from_u8(buf.get_u8());
        let status = ServiceStatus(buf.get_u8());
        let address = (len >= SERVICE_LEN_ADDRESS).then(|| LogicalAddress::read(buf));
        Self {
            service,
            status,
            address,
        }
    }
}

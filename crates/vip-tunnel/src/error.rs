//! Tunnel error types
//!
//! [`TunnelError`] is returned synchronously and travels in OPEN_NACK
//! frames. Outer-link failures are reported asynchronously as a
//! [`CloseReason`] through `TunnelHandler::on_closed`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TunnelError>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelError {
    #[error("packet too short")]
    PacketTooShort,

    #[error("channel already exists")]
    AlreadyExists,

    #[error("malformed packet")]
    Malformed,

    #[error("internal error")]
    Internal,

    #[error("not implemented")]
    NotImplemented,

    #[error("no such channel")]
    NoSuchChannel,

    #[error("forbidden")]
    Forbidden,

    #[error("unknown error")]
    Unknown,
}

impl TunnelError {
    /// Wire code carried by OPEN_NACK
    pub fn code(self) -> u8 {
        match self {
            TunnelError::PacketTooShort => 1,
            TunnelError::AlreadyExists => 2,
            TunnelError::Malformed => 3,
            TunnelError::Internal => 4,
            TunnelError::NotImplemented => 5,
            TunnelError::NoSuchChannel => 6,
            TunnelError::Forbidden => 7,
            TunnelError::Unknown => 8,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => TunnelError::PacketTooShort,
            2 => TunnelError::AlreadyExists,
            3 => TunnelError::Malformed,
            4 => TunnelError::Internal,
            5 => TunnelError::NotImplemented,
            6 => TunnelError::NoSuchChannel,
            7 => TunnelError::Forbidden,
            _ => TunnelError::Unknown,
        }
    }
}

/// Why a tunnel stopped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    #[error("closed locally")]
    Local,

    #[error("peer said goodbye")]
    Goodbye,

    #[error("TCP connection shut down")]
    TcpShutdown,

    #[error("TCP error: {0}")]
    TcpError(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("peer silent")]
    Timeout,
}

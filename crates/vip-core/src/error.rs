//! Error types for ViP core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Logical address could not be parsed or is outside the allowed set
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Address range with min above max
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Buffer shorter than the fixed header
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// Record shorter than the minimum length of its message type
    #[error("message 0x{msg_type:02x} too short: need {needed} bytes, have {have}")]
    TooShort {
        msg_type: u8,
        needed: usize,
        have: usize,
    },

    /// Message type code not in the catalogue
    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    /// Record long enough but with inconsistent contents
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Encoded record exceeds the transport limit
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

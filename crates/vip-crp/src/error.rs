//! CRP error types

use crate::IdentityId;
use thiserror::Error;
use vip_core::LogicalAddress;

pub type Result<T> = std::result::Result<T, CrpError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrpError {
    /// Unassigned, broadcast or otherwise unusable address
    #[error("invalid address: {0}")]
    InvalidAddress(LogicalAddress),

    #[error("identity already registered: {0}")]
    DuplicateIdentity(LogicalAddress),

    #[error("unknown identity: {0}")]
    UnknownIdentity(IdentityId),

    /// Resolution needs at least one identity to send requests from
    #[error("no identity registered")]
    NoIdentity,

    #[error("resolution cache full")]
    CacheFull,

    #[error("malformed packet: {0}")]
    Malformed(String),
}

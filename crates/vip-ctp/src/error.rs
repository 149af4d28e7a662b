//! CTP error types

use crate::{Cid, TapId};
use thiserror::Error;
use vip_core::LogicalAddress;
use vip_crp::{CrpError, IdentityId};

pub type Result<T> = std::result::Result<T, CtpError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CtpError {
    /// Unknown, closing or closed connection
    #[error("connection {0} is not usable")]
    Conn(Cid),

    #[error("unknown identity: {0}")]
    UnknownIdentity(IdentityId),

    #[error("unknown tap: {0:?}")]
    UnknownTap(TapId),

    #[error("invalid address: {0}")]
    InvalidAddress(LogicalAddress),

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("connection table full")]
    TooManyConnections,

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("resolution failed: {0}")]
    Resolve(#[from] CrpError),
}

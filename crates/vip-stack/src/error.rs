//! Stack error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StackError>;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("resolution error: {0}")]
    Crp(#[from] vip_crp::CrpError),

    #[error("transport error: {0}")]
    Ctp(#[from] vip_ctp::CtpError),

    #[error("signalling error: {0}")]
    Csp(#[from] vip_core::Error),

    #[error("socket error: {0}")]
    Socket(#[from] vip_transport::TransportError),

    /// Identities need a fixed port; 0 is refused
    #[error("invalid port: {0}")]
    InvalidPort(u16),

    #[error("configuration error: {0}")]
    Config(String),
}

//! ViP Core
//!
//! Shared types for the ViP device stack.
//!
//! This crate provides:
//! - Logical addressing ([`LogicalAddress`], [`AddressRange`])
//! - The CSP signalling message catalogue and its binary codec ([`csp`])
//! - The call state machine driven by CSP messages ([`Call`])

pub mod address;
pub mod csp;
pub mod error;
pub mod session;

pub use address::{AddressRange, LogicalAddress, PrintForm};
pub use csp::{Message, MessageType};
pub use error::{Error, Result};
pub use session::{Call, CallRole, CallState};

/// Well-known UDP port shared by CRP and CTP identities
pub const DEFAULT_PORT: u16 = 24101;

/// Default TCP port for ViPER tunnel relays
pub const DEFAULT_TUNNEL_PORT: u16 = 64100;

/// Largest CSP record carried in one CTP message
pub const MAX_CSP_SIZE: usize = 1400;

//! ViP Stack
//!
//! One [`Stack`] holds everything a process needs to talk CRP, CTP and CSP:
//! the identity sockets (one per port, shared), the resolver, the
//! transport, tap sinks and per-connection call tracking. Construct it once
//! at startup and drive it from a single thread.
//!
//! [`bridge`] joins a stack tap to a tunnel channel so CTP can reach peers
//! behind a relay.

pub mod bridge;
pub mod config;
pub mod error;
pub mod stack;

pub use bridge::{CtpChannel, PacketQueue, TunnelBridge};
pub use config::{IdentityConfig, StackConfig};
pub use error::{Result, StackError};
pub use stack::{Stack, StackEvent};

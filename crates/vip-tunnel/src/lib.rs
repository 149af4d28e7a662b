//! ViPER Tunnel
//!
//! Multiplexes channels over one outer TCP stream (or a tap supplied by the
//! caller) between a device or gateway and a relay. Once the tunnel is up
//! the server may offer a UDP "lane" so datagram-flagged sends bypass the
//! stream.
//!
//! ```text
//!  ┌──────────────────────────── Tunnel ─────────────────────────────┐
//!  │  channel 1 (CTP0)   channel 2 (RTSP)   channel 3 (GSVC) ...     │
//!  │        │                   │                  │                 │
//!  │        └───────── frames ──┴──────────────────┘                 │
//!  │                      │                    │ DATAGRAM sends      │
//!  │                 outer TCP / tap       UDP lane (when Active)    │
//!  └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`Tunnel`] itself never touches a socket. [`TunnelRunner`] drives one on
//! a dedicated thread; other threads reach it through [`TunnelControl`].

pub mod channel;
pub mod config;
pub mod error;
pub mod frame;
pub mod lane;
pub mod runner;
pub mod tunnel;

pub use channel::{
    ctp_metadata, parse_ctp_metadata, ChannelHandler, ChannelId, ChannelState, IncomingChannel,
    Outbox, Preference, SendFlags, ServiceId, TunnelHandler,
};
pub use config::{LaneConfig, TunnelConfig};
pub use error::{CloseReason, Result, TunnelError};
pub use frame::{Frame, FrameKind};
pub use lane::{LanePacket, LaneState};
pub use runner::{RunExit, TunnelControl, TunnelListener, TunnelRunner};
pub use tunnel::{Role, Tunnel};

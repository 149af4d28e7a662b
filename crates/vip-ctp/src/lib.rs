//! ViP Reliable Transport (CTP)
//!
//! Ordered, acknowledged, retransmitted message delivery between two
//! logical addresses over UDP, or over a tap supplied by the caller (a
//! tunnel channel, for instance).
//!
//! Like the resolver, [`Transport`] is sans-IO: datagrams go in through
//! [`Transport::handle_datagram`] / [`Transport::handle_tap`] and come out
//! of [`Transport::poll_transmit`]. Time advances only through
//! [`Transport::timer`].

pub mod arq;
pub mod config;
pub mod connection;
pub mod error;
pub mod packet;
pub mod transport;

pub use config::CtpConfig;
pub use connection::{CloseCause, ConnectionInfo, ConnectionState, ConnectionStats};
pub use error::{CtpError, Result};
pub use packet::{CtpPacket, PacketKind};
pub use transport::{Broadcast, Cid, Path, TapId, Transmit, Transport, TransportEvent};

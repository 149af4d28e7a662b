//! ViP Transport Layer
//!
//! The protocol crates never touch sockets themselves. This crate provides
//! the seam they are driven through:
//! - [`DatagramSocket`] / [`Network`]: non-blocking datagram I/O
//! - [`UdpNetwork`]: real UDP sockets configured through socket2
//! - [`MemoryNetwork`]: an in-process network with fault injection, for tests
//! - [`tcp`]: outer stream helpers used by the tunnel

pub mod error;
pub mod memory;
pub mod tcp;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use memory::{FaultConfig, MemoryHost, MemoryNetwork, MemorySocket, NetworkStats};
pub use tcp::{TcpConfig, TcpServer};
pub use traits::{DatagramSocket, Network};
pub use udp::{UdpConfig, UdpDatagramSocket, UdpNetwork};

/// Largest datagram the receive paths read
pub const MAX_DATAGRAM_SIZE: usize = 2048;

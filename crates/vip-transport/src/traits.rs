//! Datagram socket seam

use std::net::SocketAddr;

use crate::error::Result;

/// A bound, non-blocking datagram socket
pub trait DatagramSocket {
    /// Send one datagram
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize>;

    /// Receive one datagram if one is queued. Never blocks.
    fn try_recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>>;

    /// Address the socket is bound to
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// Factory for datagram sockets
pub trait Network {
    type Socket: DatagramSocket;

    /// Bind a socket. Port 0 picks a free port.
    fn bind(&self, addr: SocketAddr) -> Result<Self::Socket>;
}

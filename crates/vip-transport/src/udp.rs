//! UDP sockets for CRP/CTP identities
//!
//! Sockets are created through socket2 so broadcast, address reuse and
//! buffer sizes can be set before binding, then handed over as
//! non-blocking `std::net::UdpSocket`s. Nothing here spawns tasks: the
//! owner polls [`DatagramSocket::try_recv_from`] from its run loop.

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{DatagramSocket, Network};

/// UDP socket options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Allow sending to broadcast addresses (needed by CRP requests)
    pub broadcast: bool,
    /// SO_REUSEADDR before bind
    pub reuse_address: bool,
    /// Kernel receive buffer size (0 = OS default)
    pub recv_buffer_size: usize,
    /// Kernel send buffer size (0 = OS default)
    pub send_buffer_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            broadcast: true,
            reuse_address: true,
            recv_buffer_size: 256 * 1024,
            send_buffer_size: 0,
        }
    }
}

/// Network backed by the OS UDP stack
#[derive(Debug, Clone, Default)]
pub struct UdpNetwork {
    config: UdpConfig,
}

impl UdpNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: UdpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UdpConfig {
        &self.config
    }
}

impl Network for UdpNetwork {
    type Socket = UdpDatagramSocket;

    fn bind(&self, addr: SocketAddr) -> Result<UdpDatagramSocket> {
        let socket = open_socket(addr, &self.config).map_err(|e| match e.kind() {
            io::ErrorKind::AddrInUse => TransportError::AddrInUse(addr),
            _ => TransportError::BindFailed(format!("{}: {}", addr, e)),
        })?;
        let local = socket.local_addr()?;
        info!("UDP bound to {}", local);
        Ok(UdpDatagramSocket { socket })
    }
}

fn open_socket(addr: SocketAddr, config: &UdpConfig) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    if config.reuse_address {
        socket.set_reuse_address(true)?;
    }
    if config.broadcast && addr.is_ipv4() {
        socket.set_broadcast(true)?;
    }
    if config.recv_buffer_size > 0 {
        if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
            debug!("recv buffer {} rejected: {}", config.recv_buffer_size, e);
        }
    }
    if config.send_buffer_size > 0 {
        if let Err(e) = socket.set_send_buffer_size(config.send_buffer_size) {
            debug!("send buffer {} rejected: {}", config.send_buffer_size, e);
        }
    }
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(addr))?;

    Ok(socket.into())
}

/// Non-blocking OS UDP socket
#[derive(Debug)]
pub struct UdpDatagramSocket {
    socket: UdpSocket,
}

impl DatagramSocket for UdpDatagramSocket {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        match self.socket.send_to(buf, target) {
            Ok(n) => Ok(n),
            // Full send buffer is treated like loss; the protocols retransmit
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("UDP send to {} would block, dropped", target);
                Ok(0)
            }
            Err(e) => Err(TransportError::SendFailed(format!("{}: {}", target, e))),
        }
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((len, from)) => Ok(Some((len, from))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            // ICMP port unreachable surfaces here on some platforms
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(None),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }
}

//! Outer TCP streams for tunnels
//!
//! Tunnel frames carry their own length, so unlike message transports no
//! extra framing is added here; these helpers only establish streams with
//! the socket options the tunnel expects.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};

/// TCP configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Keep-alive idle time in seconds (0 = disabled)
    pub keepalive_secs: u64,
    /// Disable Nagle; tunnel frames are small and latency bound
    pub nodelay: bool,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: 30,
            nodelay: true,
            connect_timeout_ms: 5000,
        }
    }
}

fn apply_options(stream: &TcpStream, config: &TcpConfig) {
    if config.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY: {}", e);
        }
    }
    if config.keepalive_secs > 0 {
        let socket = socket2::SockRef::from(stream);
        let keepalive =
            socket2::TcpKeepalive::new().with_time(Duration::from_secs(config.keepalive_secs));
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            warn!("failed to enable TCP keepalive: {}", e);
        }
    }
}

/// Connect to a tunnel server
pub async fn connect(addr: SocketAddr, config: &TcpConfig) -> Result<TcpStream> {
    info!("Connecting to TCP: {}", addr);
    let timeout = Duration::from_millis(config.connect_timeout_ms);
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", addr, e)))?;

    apply_options(&stream, config);
    info!("TCP connected to {}", addr);
    Ok(stream)
}

/// Listener for incoming tunnel streams
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    pub async fn bind_with_config(addr: SocketAddr, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {}", addr, e)))?;
        info!("TCP server listening on {}", addr);
        Ok(Self { listener, config })
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        debug!("TCP connection accepted from {}", peer);
        apply_options(&stream, &self.config);
        Ok((stream, peer))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_tcp_config_default() {
        let config = TcpConfig::default();
        assert_eq!(config.keepalive_secs, 30);
        assert!(config.nodelay);
    }

    #[tokio::test]
    async fn test_connect_and_accept() {
        let server = TcpServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (mut stream, _) = server.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let mut client = connect(addr, &TcpConfig::default()).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut echo = [0u8; 5];
        client.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"hello");
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let server = TcpServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
            server.local_addr().unwrap().port()
        };
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        assert!(connect(addr, &TcpConfig::default()).await.is_err());
    }
}

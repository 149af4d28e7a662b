//! Socket driver for a [`Tunnel`]
//!
//! Each runner owns a current-thread tokio runtime, the outer TCP stream
//! and the lane socket. [`TunnelRunner::run`] blocks the calling thread
//! until the tunnel closes or a [`TunnelControl`] suspends it; a suspended
//! runner can be resumed by calling `run` again.

use bytes::{Buf, BytesMut};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use vip_transport::{tcp, TcpServer, TransportError};

use crate::channel::TunnelHandler;
use crate::tunnel::{Role, Tunnel};
use crate::{CloseReason, TunnelConfig};

const READ_BUFFER_SIZE: usize = 16 * 1024;
const LANE_BUFFER_SIZE: usize = 64 * 1024;

/// Time allowed for queued output and the FIN once the tunnel has closed
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Why [`TunnelRunner::run`] returned
#[derive(Debug, Clone, PartialEq)]
pub enum RunExit {
    /// Suspended through a [`TunnelControl`]; `run` may be called again
    Suspended,
    Closed(CloseReason),
}

type Trigger = Box<dyn FnOnce(&mut Tunnel) + Send>;

enum Control {
    Suspend,
    Trigger(Trigger),
}

/// Handle for reaching a running tunnel from other threads
#[derive(Clone)]
pub struct TunnelControl {
    tx: mpsc::UnboundedSender<Control>,
}

impl TunnelControl {
    /// Make `run` return [`RunExit::Suspended`]. Output the socket has not
    /// taken yet stays queued for the next `run`. Returns false if the
    /// runner is gone.
    pub fn suspend(&self) -> bool {
        self.tx.send(Control::Suspend).is_ok()
    }

    /// Run `f` on the tunnel's thread between I/O events
    pub fn trigger(&self, f: impl FnOnce(&mut Tunnel) + Send + 'static) -> bool {
        self.tx.send(Control::Trigger(Box::new(f))).is_ok()
    }
}

impl std::fmt::Debug for TunnelControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelControl")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

pub struct TunnelRunner {
    runtime: Runtime,
    io: TunnelIo,
}

struct TunnelIo {
    tunnel: Tunnel,
    stream: TcpStream,
    lane: Option<UdpSocket>,
    /// Stream output not yet accepted by the socket
    pending: BytesMut,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    tick: Duration,
}

fn new_runtime() -> io::Result<Runtime> {
    Builder::new_current_thread().enable_all().build()
}

fn wildcard_for(addr: &SocketAddr) -> SocketAddr {
    let ip = match addr {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

impl TunnelRunner {
    /// Connect to a tunnel server as the client
    pub fn connect(
        addr: SocketAddr,
        config: TunnelConfig,
        handler: Box<dyn TunnelHandler>,
    ) -> Result<Self, TransportError> {
        let runtime = new_runtime()?;
        let lane_enabled = config.lane.enabled;
        let (stream, lane) = runtime.block_on(async {
            let stream = tcp::connect(addr, &config.tcp).await?;
            let lane = if lane_enabled {
                Some(UdpSocket::bind(wildcard_for(&addr)).await?)
            } else {
                None
            };
            Ok::<_, TransportError>((stream, lane))
        })?;

        let mut tunnel = Tunnel::new(Role::Client, config, handler);
        tunnel.set_outer_peer(addr);
        Ok(Self::assemble(runtime, tunnel, stream, lane))
    }

    fn assemble(
        runtime: Runtime,
        tunnel: Tunnel,
        stream: TcpStream,
        lane: Option<UdpSocket>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let tick = Duration::from_millis(tunnel.config().tick_ms.max(1));
        Self {
            runtime,
            io: TunnelIo {
                tunnel,
                stream,
                lane,
                pending: BytesMut::new(),
                control_tx,
                control_rx,
                tick,
            },
        }
    }

    pub fn tunnel(&self) -> &Tunnel {
        &self.io.tunnel
    }

    pub fn tunnel_mut(&mut self) -> &mut Tunnel {
        &mut self.io.tunnel
    }

    pub fn control(&self) -> TunnelControl {
        TunnelControl {
            tx: self.io.control_tx.clone(),
        }
    }

    pub fn lane_addr(&self) -> Option<SocketAddr> {
        self.io.lane.as_ref().and_then(|lane| lane.local_addr().ok())
    }

    /// Drive the tunnel until it closes or is suspended
    pub fn run(&mut self) -> RunExit {
        self.runtime.block_on(self.io.run())
    }

    /// Run on a dedicated thread; the runner is handed back when `run`
    /// returns
    pub fn spawn(mut self) -> io::Result<(TunnelControl, JoinHandle<(TunnelRunner, RunExit)>)> {
        let control = self.control();
        let name = format!("vip-tunnel-{}", self.io.tunnel.id().simple());
        let handle = std::thread::Builder::new().name(name).spawn(move || {
            let exit = self.run();
            (self, exit)
        })?;
        Ok((control, handle))
    }
}

impl std::fmt::Debug for TunnelRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelRunner")
            .field("tunnel", &self.io.tunnel)
            .field("lane", &self.lane_addr())
            .finish()
    }
}

async fn recv_lane(lane: Option<&UdpSocket>, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    match lane {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

impl TunnelIo {
    async fn run(&mut self) -> RunExit {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut lane_buf = vec![0u8; LANE_BUFFER_SIZE];
        let id = self.tunnel.id();
        let (mut reader, mut writer) = self.stream.split();

        loop {
            while let Some(bytes) = self.tunnel.poll_output() {
                self.pending.extend_from_slice(&bytes);
            }
            send_lane(&mut self.tunnel, self.lane.as_ref());

            if let Some(reason) = self.tunnel.close_reason().cloned() {
                let pending = &self.pending;
                let goodbye = async {
                    writer.write_all(pending).await?;
                    writer.shutdown().await
                };
                match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, goodbye).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("tunnel {}: shutdown: {}", id, e),
                    Err(_) => debug!("tunnel {}: peer not reading, dropping output", id),
                }
                self.pending.clear();
                return RunExit::Closed(reason);
            }

            // Writes share the select so a stalled peer cannot hold off
            // control messages
            tokio::select! {
                control = self.control_rx.recv() => match control {
                    Some(Control::Suspend) => {
                        debug!("tunnel {} suspended, {} bytes queued", id, self.pending.len());
                        return RunExit::Suspended;
                    }
                    Some(Control::Trigger(f)) => f(&mut self.tunnel),
                    // The sender half lives in `self`
                    None => {}
                },
                written = writer.write(&self.pending), if !self.pending.is_empty() => match written {
                    Ok(0) => self.tunnel.fail(CloseReason::TcpShutdown),
                    Ok(n) => self.pending.advance(n),
                    Err(e) => self.tunnel.fail(CloseReason::TcpError(e.to_string())),
                },
                read = reader.read(&mut buf) => match read {
                    Ok(0) => self.tunnel.fail(CloseReason::TcpShutdown),
                    Ok(n) => self.tunnel.handle_input(&buf[..n]),
                    Err(e) => self.tunnel.fail(CloseReason::TcpError(e.to_string())),
                },
                recv = recv_lane(self.lane.as_ref(), &mut lane_buf) => match recv {
                    Ok((n, from)) => self.tunnel.handle_lane_datagram(from, &lane_buf[..n]),
                    Err(e) => debug!("tunnel {}: lane recv: {}", id, e),
                },
                _ = ticker.tick() => self.tunnel.timer(1),
            }
        }
    }
}

/// Lane datagrams are best effort; one that would block is dropped
fn send_lane(tunnel: &mut Tunnel, lane: Option<&UdpSocket>) {
    while let Some((to, datagram)) = tunnel.poll_lane_transmit() {
        let Some(lane) = lane else {
            continue;
        };
        if let Err(e) = lane.try_send_to(&datagram, to) {
            debug!("tunnel {}: lane send to {}: {}", tunnel.id(), to, e);
        }
    }
}

/// Accepts tunnels as the server
pub struct TunnelListener {
    runtime: Runtime,
    server: TcpServer,
    config: TunnelConfig,
}

impl TunnelListener {
    pub fn bind(addr: SocketAddr, config: TunnelConfig) -> Result<Self, TransportError> {
        let runtime = new_runtime()?;
        let server = runtime.block_on(TcpServer::bind_with_config(addr, config.tcp.clone()))?;
        Ok(Self {
            runtime,
            server,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.server.local_addr()
    }

    /// Block until a client connects. The returned runner has already
    /// queued the lane offer when lanes are enabled.
    pub fn accept(&self, handler: Box<dyn TunnelHandler>) -> Result<TunnelRunner, TransportError> {
        let (stream, peer) = self.runtime.block_on(self.server.accept())?;
        let local = stream.local_addr()?;
        let stream = stream.into_std()?;

        // The stream moves to a runtime of its own
        let runtime = new_runtime()?;
        let lane_config = self.config.lane.clone();
        let (stream, lane) = runtime.block_on(async {
            let stream = TcpStream::from_std(stream)?;
            let lane = if lane_config.enabled {
                match UdpSocket::bind(SocketAddr::new(local.ip(), lane_config.port)).await {
                    Ok(socket) => Some(socket),
                    Err(e) => {
                        warn!("lane socket unavailable, running without: {}", e);
                        None
                    }
                }
            } else {
                None
            };
            Ok::<_, io::Error>((stream, lane))
        })?;

        let mut tunnel = Tunnel::new(Role::Server, self.config.clone(), handler);
        tunnel.set_outer_peer(peer);
        if let Some(socket) = &lane {
            let port = socket.local_addr()?.port();
            if let Err(e) = tunnel.offer_lane(port) {
                warn!("tunnel {}: lane not offered: {}", tunnel.id(), e);
            }
        }
        info!("tunnel {} accepted from {}", tunnel.id(), peer);
        Ok(TunnelRunner::assemble(runtime, tunnel, stream, lane))
    }
}

//! Tunnel server and client commands

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use colored::Colorize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use vip_tunnel::{
    ChannelHandler, ChannelId, CloseReason, IncomingChannel, LaneState, Outbox, Preference,
    SendFlags, ServiceId, TunnelConfig, TunnelError, TunnelHandler, TunnelListener, TunnelRunner,
};

const WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// Accepts every channel and echoes it
struct EchoService;

impl TunnelHandler for EchoService {
    fn on_incoming_channel(
        &mut self,
        request: &IncomingChannel<'_>,
    ) -> vip_tunnel::Result<Box<dyn ChannelHandler>> {
        info!(
            "{} opened for {} ({:?})",
            request.id, request.service, request.preference
        );
        Ok(Box::new(Echo))
    }

    fn on_lane_status(&mut self, state: LaneState) {
        info!("lane {:?}", state);
    }

    fn on_closed(&mut self, reason: &CloseReason) {
        info!("tunnel closed: {}", reason);
    }
}

struct Echo;

impl ChannelHandler for Echo {
    fn on_data(&mut self, channel: ChannelId, data: Bytes, out: &mut Outbox) {
        debug!("{}: echoing {} bytes", channel, data.len());
        out.send(channel, data, SendFlags::NONE);
    }

    fn on_closed(&mut self, channel: ChannelId) {
        debug!("{} closed", channel);
    }
}

pub fn serve(bind: SocketAddr, config: TunnelConfig, running: &AtomicBool) -> Result<()> {
    let listener = TunnelListener::bind(bind, config).context("Failed to bind tunnel server")?;
    println!(
        "{} Tunnel server listening on {}",
        "OK".green().bold(),
        listener.local_addr()?
    );
    println!("  Press Ctrl+C to stop");

    // Accepting blocks, so it gets a thread; each tunnel runs on its own
    std::thread::Builder::new()
        .name("vip-accept".into())
        .spawn(move || loop {
            match listener.accept(Box::new(EchoService)) {
                Ok(runner) => {
                    let id = runner.tunnel().id();
                    let peer = runner.tunnel().outer_peer();
                    match runner.spawn() {
                        Ok(_) => info!("tunnel {} from {:?}", id, peer),
                        Err(e) => warn!("could not start tunnel {}: {}", id, e),
                    }
                }
                Err(e) => {
                    warn!("accept failed: {}", e);
                    std::thread::sleep(WAIT_INTERVAL);
                }
            }
        })?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(WAIT_INTERVAL);
    }
    println!("{}", "Server stopped".yellow());
    Ok(())
}

/// Client side: incoming channels are refused
struct ClientHandler;

impl TunnelHandler for ClientHandler {
    fn on_incoming_channel(
        &mut self,
        request: &IncomingChannel<'_>,
    ) -> vip_tunnel::Result<Box<dyn ChannelHandler>> {
        debug!("refusing {} for {}", request.id, request.service);
        Err(TunnelError::Forbidden)
    }

    fn on_lane_status(&mut self, state: LaneState) {
        println!("{} lane {:?}", "--".cyan(), state);
    }

    fn on_closed(&mut self, reason: &CloseReason) {
        println!("{} tunnel closed: {}", "--".yellow(), reason);
    }
}

/// Sends one message when the channel opens and prints what comes back
struct Greeter {
    message: Bytes,
    flags: SendFlags,
}

impl ChannelHandler for Greeter {
    fn on_open(&mut self, channel: ChannelId, out: &mut Outbox) {
        println!("{} {} open", "OK".green().bold(), channel);
        out.send(channel, self.message.clone(), self.flags);
    }

    fn on_data(&mut self, channel: ChannelId, data: Bytes, _out: &mut Outbox) {
        println!(
            "{} {}: {}",
            "ECHO".cyan().bold(),
            channel,
            String::from_utf8_lossy(&data)
        );
    }

    fn on_open_failed(&mut self, channel: ChannelId, error: TunnelError) {
        println!("{} {} refused: {}", "ERR".red().bold(), channel, error);
    }
}

pub fn client(
    server: SocketAddr,
    config: TunnelConfig,
    message: String,
    datagram: bool,
    running: &AtomicBool,
) -> Result<()> {
    let mut runner = TunnelRunner::connect(server, config, Box::new(ClientHandler))
        .with_context(|| format!("Failed to connect to {}", server))?;

    let (preference, flags) = if datagram {
        (Preference::Datagram, SendFlags::DATAGRAM)
    } else {
        (Preference::Stream, SendFlags::NONE)
    };
    let greeter = Greeter {
        message: Bytes::from(message),
        flags,
    };
    let tunnel = runner.tunnel_mut();
    let channel = tunnel.create_channel(ServiceId::GENERIC, preference, Box::new(greeter))?;
    tunnel.open_channel(channel, &[])?;

    let (control, handle) = runner.spawn()?;
    println!("  Press Ctrl+C to close the tunnel");

    while running.load(Ordering::SeqCst) && !handle.is_finished() {
        std::thread::sleep(WAIT_INTERVAL);
    }
    if !handle.is_finished() {
        control.trigger(|tunnel| tunnel.close());
    }

    let (_runner, exit) = handle
        .join()
        .map_err(|_| anyhow!("tunnel thread panicked"))?;
    println!("{} {:?}", "--".yellow(), exit);
    Ok(())
}

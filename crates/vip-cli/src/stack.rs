//! Commands driven by a stack on the OS UDP network

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;
use vip_core::csp::{
    AlertType, AlertingMessage, CallType, Message, ReleaseCause, ReleaseMessage, StartMessage,
};
use vip_core::{CallState, LogicalAddress};
use vip_crp::ResolveStatus;
use vip_ctp::{Cid, ConnectionState, TransportEvent};
use vip_stack::{Stack, StackConfig, StackEvent};
use vip_transport::{Network, UdpNetwork};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long a hang-up keeps driving the stack for RELEASE and FIN to land
const HANG_UP_GRACE: Duration = Duration::from_secs(3);

/// Runs the stack clocks off the wall clock
struct Driver<N: Network> {
    stack: Stack<N>,
    ctp_tick: Duration,
    crp_tick: Duration,
    next_ctp: Instant,
    next_crp: Instant,
}

impl Driver<UdpNetwork> {
    fn new(config: StackConfig) -> Result<Self> {
        Self::with_network(UdpNetwork::new(), config)
    }
}

impl<N: Network> Driver<N> {
    fn with_network(network: N, config: StackConfig) -> Result<Self> {
        let ctp_tick = Duration::from_millis(config.ctp_tick_ms.max(1));
        let crp_tick = Duration::from_millis(config.crp.tick_ms.max(1));
        let stack =
            Stack::from_config(network, config).context("Failed to start the stack")?;
        for identity in stack.resolver().identities() {
            println!(
                "{} {} on {}:{}",
                "OK".green().bold(),
                identity.address.to_string().yellow(),
                identity.ip,
                identity.port
            );
        }
        let now = Instant::now();
        Ok(Self {
            stack,
            ctp_tick,
            crp_tick,
            next_ctp: now + ctp_tick,
            next_crp: now + crp_tick,
        })
    }

    /// Wait a little, then process input and due timers
    fn poll(&mut self) -> Vec<StackEvent> {
        std::thread::sleep(POLL_INTERVAL);
        self.stack.run();
        let now = Instant::now();
        while self.next_ctp <= now {
            self.stack.timer(1);
            self.next_ctp += self.ctp_tick;
        }
        while self.next_crp <= now {
            self.stack.crp_timer(1);
            self.next_crp += self.crp_tick;
        }
        std::iter::from_fn(|| self.stack.poll_event()).collect()
    }

    /// Keep driving until `cid` has finished closing or `grace` runs out.
    /// Returns whether the close completed.
    fn finish_close(&mut self, cid: Cid, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            if matches!(
                self.stack.state(cid),
                None | Some(ConnectionState::Closed)
            ) {
                return true;
            }
            if Instant::now() >= deadline {
                debug!("{}: close still pending", cid);
                return false;
            }
            self.poll();
        }
    }
}

pub fn resolve(
    config: StackConfig,
    target: LogicalAddress,
    timeout: u64,
    running: &AtomicBool,
) -> Result<()> {
    let mut driver = Driver::new(config)?;
    let deadline = Instant::now() + Duration::from_secs(timeout);
    driver.stack.resolve(&target)?;

    while running.load(Ordering::SeqCst) {
        match driver.stack.is_resolved(&target) {
            ResolveStatus::Resolved(addr) => {
                println!(
                    "{} {} is at {}",
                    "OK".green().bold(),
                    target.to_string().yellow(),
                    addr
                );
                return Ok(());
            }
            ResolveStatus::Failed => bail!("No answer for {}", target),
            ResolveStatus::Unknown => {
                driver.stack.resolve(&target)?;
            }
            ResolveStatus::Pending => {}
        }
        if Instant::now() >= deadline {
            bail!("Timed out resolving {}", target);
        }
        driver.poll();
    }
    Ok(())
}

/// Answer every START with PROCEEDING, ALERTING and CONNECT
pub fn listen(config: StackConfig, running: &AtomicBool) -> Result<()> {
    let mut driver = Driver::new(config)?;
    let mut calls = BTreeSet::new();
    println!("  Waiting for calls, press Ctrl+C to stop");

    while running.load(Ordering::SeqCst) {
        for event in driver.poll() {
            match event {
                StackEvent::Transport(TransportEvent::Incoming { cid }) => {
                    if let Some(info) = driver.stack.info(cid) {
                        println!("{} {} from {}", "IN".cyan().bold(), cid, info.peer);
                    }
                    calls.insert(cid);
                }
                StackEvent::Transport(TransportEvent::Closed { cid, cause }) => {
                    println!("{} {} closed ({:?})", "--".yellow(), cid, cause);
                }
                _ => {}
            }
        }

        let mut finished = Vec::new();
        for &cid in &calls {
            loop {
                match driver.stack.read_csp(cid) {
                    Ok(Some(message)) => answer(&mut driver.stack, cid, message)?,
                    Ok(None) => break,
                    Err(_) => {
                        finished.push(cid);
                        break;
                    }
                }
            }
        }
        for cid in finished {
            calls.remove(&cid);
        }
    }

    println!("{}", "Listener stopped".yellow());
    Ok(())
}

fn answer(stack: &mut Stack<UdpNetwork>, cid: Cid, message: Message) -> Result<()> {
    println!("{} {} {}", "CSP".cyan(), cid, message.message_type().name());
    match message {
        Message::Start(start) => {
            println!(
                "  {} -> {}, call {}",
                start.from, start.to, start.call_id
            );
            stack.send_csp(cid, &Message::Proceeding)?;
            stack.send_csp(
                cid,
                &Message::Alerting(AlertingMessage {
                    alert: AlertType::Ringing,
                }),
            )?;
            stack.send_csp(cid, &Message::Connect)?;
            println!("{} {} connected", "OK".green().bold(), cid);
        }
        Message::Release(release) => {
            println!("  released ({:?})", release.cause);
            if let Err(e) = stack.close(cid) {
                debug!("{}: already closing: {}", cid, e);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Place a call, stay connected for `duration` seconds, then release
pub fn call(
    config: StackConfig,
    target: LogicalAddress,
    duration: u64,
    call_id: u32,
    running: &AtomicBool,
) -> Result<()> {
    let mut driver = Driver::new(config)?;
    let identity = driver
        .stack
        .resolver()
        .identities()
        .next()
        .copied()
        .context("No identity to call from")?;

    let cid = driver.stack.connect(identity.id, target)?;
    let start = StartMessage::new(identity.address, target, CallType::Normal, call_id);
    driver.stack.send_csp(cid, &Message::Start(start))?;

    let hold = Duration::from_secs(duration);
    let mut connected_at = None;
    let mut released = false;

    while running.load(Ordering::SeqCst) {
        let events = driver.poll();

        loop {
            match driver.stack.read_csp(cid) {
                Ok(Some(message)) => {
                    println!("{} {}", "CSP".cyan(), message.message_type().name());
                    if let Message::Release(release) = message {
                        println!("  released by callee ({:?})", release.cause);
                        released = true;
                        if let Err(e) = driver.stack.close(cid) {
                            debug!("{}: already closing: {}", cid, e);
                        }
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }

        for event in events {
            if let StackEvent::Transport(TransportEvent::Closed { cid: closed, cause }) = event {
                if closed == cid {
                    println!("{} call ended ({:?})", "--".yellow(), cause);
                    return Ok(());
                }
            }
        }

        if connected_at.is_none() && driver.stack.call_state(cid) == Some(CallState::Connected) {
            println!("{} connected", "OK".green().bold());
            connected_at = Some(Instant::now());
        }
        if let Some(at) = connected_at {
            if !released && at.elapsed() >= hold {
                hang_up(&mut driver, cid, HANG_UP_GRACE)?;
                return Ok(());
            }
        }
    }

    if !released {
        hang_up(&mut driver, cid, HANG_UP_GRACE)?;
    }
    Ok(())
}

/// Send RELEASE and close, then keep the stack running so both are
/// retransmitted until acknowledged
fn hang_up<N: Network>(driver: &mut Driver<N>, cid: Cid, grace: Duration) -> Result<bool> {
    let release = Message::Release(ReleaseMessage::new(ReleaseCause::Normal));
    driver.stack.send_csp(cid, &release)?;
    driver.stack.close(cid)?;
    println!("{} released", "--".yellow());
    Ok(driver.finish_close(cid, grace))
}

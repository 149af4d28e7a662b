//! Common test helpers for the ViP crates
//!
//! - Stacks on an in-memory network, with pumping and ticking helpers
//! - Back-to-back tunnel pumping

use std::net::Ipv4Addr;
use vip_core::LogicalAddress;
use vip_crp::IdentityId;
use vip_ctp::{Cid, TransportEvent};
use vip_stack::{Stack, StackConfig, StackEvent};
use vip_transport::{MemoryHost, MemoryNetwork};
use vip_tunnel::Tunnel;

pub const NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

pub fn addr(s: &str) -> LogicalAddress {
    LogicalAddress::parse(s).unwrap()
}

// ============================================================================
// Stacks
// ============================================================================

pub type TestStack = Stack<MemoryHost>;

/// A stack on `net` at `ip` with one identity on the default port
pub fn stack_with_identity(
    net: &MemoryNetwork,
    ip: [u8; 4],
    address: &str,
) -> (TestStack, IdentityId) {
    let ip = Ipv4Addr::from(ip);
    let mut stack = Stack::new(net.host(ip), StackConfig::default());
    let id = stack
        .register_identity(addr(address), ip, NETMASK, vip_core::DEFAULT_PORT)
        .unwrap();
    (stack, id)
}

/// Run every stack until none of them reads anything
pub fn pump(stacks: &mut [&mut TestStack]) {
    loop {
        let mut received = 0;
        for stack in stacks.iter_mut() {
            received += stack.run();
        }
        if received == 0 {
            break;
        }
    }
}

/// Advance the CTP clock one tick at a time, pumping in between
pub fn tick(stacks: &mut [&mut TestStack], ticks: u64) {
    for _ in 0..ticks {
        for stack in stacks.iter_mut() {
            stack.timer(1);
        }
        pump(stacks);
    }
}

/// Advance the CRP clock one tick at a time, pumping in between
pub fn crp_tick(stacks: &mut [&mut TestStack], ticks: u64) {
    for _ in 0..ticks {
        for stack in stacks.iter_mut() {
            stack.crp_timer(1);
        }
        pump(stacks);
    }
}

pub fn events(stack: &mut TestStack) -> Vec<StackEvent> {
    std::iter::from_fn(|| stack.poll_event()).collect()
}

/// First incoming connection among the pending events
pub fn incoming(stack: &mut TestStack) -> Option<Cid> {
    events(stack).into_iter().find_map(|event| match event {
        StackEvent::Transport(TransportEvent::Incoming { cid }) => Some(cid),
        _ => None,
    })
}

// ============================================================================
// Tunnels
// ============================================================================

/// Move stream bytes between two tunnels until both are quiet
pub fn pump_tunnels(a: &mut Tunnel, b: &mut Tunnel) -> usize {
    let mut moved = 0;
    loop {
        let before = moved;
        while let Some(bytes) = a.poll_output() {
            b.handle_input(&bytes);
            moved += 1;
        }
        while let Some(bytes) = b.poll_output() {
            a.handle_input(&bytes);
            moved += 1;
        }
        if moved == before {
            return moved;
        }
    }
}

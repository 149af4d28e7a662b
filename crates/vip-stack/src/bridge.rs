//! CTP carried over a tunnel channel
//!
//! When a peer cannot be addressed directly, its CTP packets travel on a
//! [`ServiceId::CTP`] channel instead of UDP. The stack sees a tap: packets
//! it emits are handed to the channel, and packets arriving on the channel
//! are queued until the stack owner calls [`TunnelBridge::pump`] from the
//! stack's thread.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};
use vip_core::LogicalAddress;
use vip_ctp::TapId;
use vip_transport::Network;
use vip_tunnel::{
    ChannelHandler, ChannelId, IncomingChannel, Outbox, SendFlags, ServiceId, TunnelControl,
    TunnelError,
};

use crate::Stack;

/// Packets crossing between a tunnel thread and the stack thread
#[derive(Debug, Clone, Default)]
pub struct PacketQueue {
    inner: Arc<Mutex<VecDeque<Bytes>>>,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, packet: Bytes) {
        self.inner.lock().push_back(packet);
    }

    pub fn drain(&self) -> Vec<Bytes> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Channel handler feeding a CTP channel's packets into a queue
///
/// Clones share the queue, so one clone can go to the tunnel while the
/// stack owner keeps another to attach a [`TunnelBridge`].
#[derive(Debug, Clone)]
pub struct CtpChannel {
    inbound: PacketQueue,
    addresses: Vec<LogicalAddress>,
}

impl CtpChannel {
    /// Opening side; its tap carries every address
    pub fn new(inbound: PacketQueue) -> Self {
        Self {
            inbound,
            addresses: Vec::new(),
        }
    }

    /// Accept an incoming channel if it is a CTP channel. The tap attached
    /// for it carries the addresses the opener announced.
    pub fn accept(request: &IncomingChannel<'_>, inbound: PacketQueue) -> vip_tunnel::Result<Self> {
        if request.service != ServiceId::CTP {
            return Err(TunnelError::Forbidden);
        }
        let addresses = vip_tunnel::parse_ctp_metadata(request.metadata)?;
        debug!("{} carries CTP for {:?}", request.id, addresses);
        Ok(Self { inbound, addresses })
    }

    /// Addresses the tap accepts connections for (all when empty)
    pub fn addresses(&self) -> &[LogicalAddress] {
        &self.addresses
    }

    pub fn inbound(&self) -> &PacketQueue {
        &self.inbound
    }
}

impl ChannelHandler for CtpChannel {
    fn on_data(&mut self, channel: ChannelId, data: Bytes, _out: &mut Outbox) {
        trace!("{}: {} byte CTP packet", channel, data.len());
        self.inbound.push(data);
    }

    fn on_closed(&mut self, channel: ChannelId) {
        debug!("CTP channel {} closed", channel);
    }
}

/// A stack tap joined to a tunnel channel
#[derive(Debug)]
pub struct TunnelBridge {
    tap: TapId,
    inbound: PacketQueue,
}

impl TunnelBridge {
    /// Register a tap for `channel`; outgoing packets go to `sink`
    pub fn attach<N: Network>(
        stack: &mut Stack<N>,
        channel: &CtpChannel,
        sink: impl FnMut(Bytes) + Send + 'static,
    ) -> Self {
        let tap = stack.add_tap(channel.addresses.clone(), sink);
        Self {
            tap,
            inbound: channel.inbound.clone(),
        }
    }

    /// Like [`TunnelBridge::attach`], sending through a running tunnel
    pub fn attach_to_runner<N: Network>(
        stack: &mut Stack<N>,
        channel: &CtpChannel,
        control: TunnelControl,
        id: ChannelId,
    ) -> Self {
        let sink = move |packet: Bytes| {
            let sent = control.trigger(move |tunnel| {
                if let Err(e) = tunnel.send(id, packet, SendFlags::NONE) {
                    debug!("{}: CTP packet not sent: {}", id, e);
                }
            });
            if !sent {
                trace!("{}: tunnel gone, CTP packet dropped", id);
            }
        };
        Self::attach(stack, channel, sink)
    }

    pub fn tap(&self) -> TapId {
        self.tap
    }

    /// Feed queued channel packets to the stack. Returns how many.
    pub fn pump<N: Network>(&self, stack: &mut Stack<N>) -> usize {
        let packets = self.inbound.drain();
        for packet in &packets {
            stack.tap_input(self.tap, packet);
        }
        packets.len()
    }

    /// Remove the tap; its connections are reset
    pub fn detach<N: Network>(self, stack: &mut Stack<N>) {
        stack.remove_tap(self.tap);
    }
}

//! Per-connection state
//!
//! ```text
//!  new_connection_out ──► Connecting ──resolved──► Open ──close()──► Closing
//!                             │                     │                  │ FIN acked
//!                             │ unresolved          │ FIN / RESET /    ▼
//!                             └────────────────────►└─ retries ──────► Closed ──linger──► (freed)
//! ```

use bytes::Bytes;
use std::collections::VecDeque;
use tracing::{debug, trace};
use vip_core::LogicalAddress;
use vip_crp::IdentityId;

use crate::arq::{RecvWindow, Segment, SendWindow};
use crate::packet::{CtpPacket, PacketKind};
use crate::transport::{Cid, IncomingKey, Path, Transmit, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Outgoing, waiting for the peer address to resolve
    Connecting,
    Open,
    /// FIN queued behind outstanding data
    Closing,
    /// Lingering before the slot is freed
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCause {
    /// Graceful close completed
    Local,
    PeerClosed,
    Reset,
    Unresolved,
    /// Retransmissions exhausted
    Timeout,
    IdentityRemoved,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub sent: u64,
    pub retransmitted: u64,
    pub delivered: u64,
    pub duplicates: u64,
}

/// Snapshot returned by `Transport::info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub cid: Cid,
    pub state: ConnectionState,
    pub local: LogicalAddress,
    pub peer: LogicalAddress,
    pub path: Option<Path>,
    pub close_cause: Option<CloseCause>,
    pub stats: ConnectionStats,
}

#[derive(Debug)]
pub(crate) struct Connection {
    pub cid: Cid,
    pub state: ConnectionState,
    pub identity: Option<IdentityId>,
    pub local: LogicalAddress,
    pub peer: LogicalAddress,
    pub path: Option<Path>,
    /// Peer's connection id, 0 until heard from
    pub peer_conn: u32,
    /// Set for connections the peer opened
    pub incoming: Option<IncomingKey>,
    pub send: SendWindow,
    pub recv: RecvWindow,
    pub delivered: VecDeque<Bytes>,
    pub ack_due: bool,
    pub close_cause: Option<CloseCause>,
    pub linger_until: u64,
    pub stats: ConnectionStats,
}

impl Connection {
    pub fn new(cid: Cid, local: LogicalAddress, peer: LogicalAddress, window: u32) -> Self {
        Self {
            cid,
            state: ConnectionState::Connecting,
            identity: None,
            local,
            peer,
            path: None,
            peer_conn: 0,
            incoming: None,
            send: SendWindow::new(window),
            recv: RecvWindow::new(window),
            delivered: VecDeque::new(),
            ack_due: false,
            close_cause: None,
            linger_until: 0,
            stats: ConnectionStats::default(),
        }
    }

    /// Accepts new writes
    pub fn is_writable(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        )
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Packet addressed from this end to the peer
    pub fn packet(&self, kind: PacketKind) -> CtpPacket {
        let mut packet = CtpPacket::new(kind, self.local, self.peer);
        packet.src_conn = self.cid.raw();
        packet.dst_conn = self.peer_conn;
        packet
    }

    /// Put every due segment on the wire
    pub fn flush(&mut self, now: u64, period: u64, out: &mut VecDeque<Transmit>) {
        let Some(path) = self.path else {
            return;
        };
        if self.is_closed() {
            return;
        }
        for due in self.send.due(now, period) {
            let mut packet = match due.segment {
                Segment::Data(payload) => {
                    let mut packet = self.packet(PacketKind::Data);
                    packet.payload = payload;
                    packet
                }
                Segment::Fin => self.packet(PacketKind::Fin),
            };
            packet.seq = due.seq;
            self.stats.sent += 1;
            if due.retransmit {
                self.stats.retransmitted += 1;
                trace!("{}: retransmit seq {}", self.cid, due.seq);
            }
            out.push_back(Transmit::new(path, packet.encode()));
        }
    }

    /// Acknowledge everything received so far
    pub fn send_ack(&mut self, out: &mut VecDeque<Transmit>) {
        self.ack_due = false;
        let Some(path) = self.path else {
            return;
        };
        let (ack, sack) = self.recv.ack();
        let mut packet = self.packet(PacketKind::Ack);
        packet.ack = ack;
        packet.sack = sack;
        out.push_back(Transmit::new(path, packet.encode()));
    }

    pub fn send_reset(&self, out: &mut VecDeque<Transmit>) {
        if let Some(path) = self.path {
            out.push_back(Transmit::new(path, self.packet(PacketKind::Reset).encode()));
        }
    }

    /// Enter `Closed`, dropping unsent data; reported once
    pub fn finish(
        &mut self,
        cause: CloseCause,
        linger_until: u64,
        events: &mut VecDeque<TransportEvent>,
    ) {
        if self.is_closed() {
            return;
        }
        debug!("{}: {:?} -> Closed ({:?})", self.cid, self.state, cause);
        self.state = ConnectionState::Closed;
        self.close_cause = Some(cause);
        self.linger_until = linger_until;
        self.send.clear();
        events.push_back(TransportEvent::Closed {
            cid: self.cid,
            cause,
        });
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            cid: self.cid,
            state: self.state,
            local: self.local,
            peer: self.peer,
            path: self.path,
            close_cause: self.close_cause,
            stats: self.stats,
        }
    }
}

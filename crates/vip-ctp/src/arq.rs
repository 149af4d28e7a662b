//! Selective-repeat ARQ windows
//!
//! Sequence numbers start at 1 in each direction and are never reused on
//! a connection. Both windows are bounded by [`MAX_WINDOW`] so a single
//! 32-bit selective-ack bitmap covers everything past the cumulative ack.

use bytes::Bytes;
use std::collections::BTreeMap;

use crate::config::MAX_WINDOW;

/// One sequenced unit of a connection's byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Data(Bytes),
    Fin,
}

#[derive(Debug)]
struct Outgoing {
    segment: Segment,
    sent: bool,
    retries: u32,
    retry_at: u64,
}

/// Segment due for (re)transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Due {
    pub seq: u32,
    pub segment: Segment,
    pub retransmit: bool,
}

#[derive(Debug)]
pub struct SendWindow {
    window: u32,
    next_seq: u32,
    queue: BTreeMap<u32, Outgoing>,
}

impl SendWindow {
    pub fn new(window: u32) -> Self {
        Self {
            window: window.clamp(1, MAX_WINDOW),
            next_seq: 1,
            queue: BTreeMap::new(),
        }
    }

    /// Queue a segment; it goes out once it fits in the window
    pub fn push(&mut self, segment: Segment) -> u32 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert(
            seq,
            Outgoing {
                segment,
                sent: false,
                retries: 0,
                retry_at: 0,
            },
        );
        seq
    }

    /// Oldest unacknowledged sequence number
    pub fn una(&self) -> u32 {
        self.queue.keys().next().copied().unwrap_or(self.next_seq)
    }

    /// Apply a cumulative ack plus selective bitmap; returns how many
    /// segments were newly acknowledged
    pub fn on_ack(&mut self, ack: u32, sack: u32) -> usize {
        let end = self.sent_end();
        if ack > end {
            // Acknowledges data never sent
            return 0;
        }
        let before = self.queue.len();
        self.queue.retain(|seq, _| *seq >= ack);
        for bit in 0..MAX_WINDOW {
            if sack & (1 << bit) != 0 {
                match ack.checked_add(1 + bit) {
                    Some(seq) if seq < end => {
                        self.queue.remove(&seq);
                    }
                    _ => break,
                }
            }
        }
        before - self.queue.len()
    }

    /// One past the highest sequence number put on the wire
    fn sent_end(&self) -> u32 {
        self.queue
            .iter()
            .rev()
            .find(|(_, out)| out.sent)
            .map_or(self.una(), |(seq, _)| seq + 1)
    }

    /// Segments to put on the wire at `now`: unsent ones inside the window
    /// plus any whose retransmission period has elapsed
    pub fn due(&mut self, now: u64, period: u64) -> Vec<Due> {
        let limit = self.una().saturating_add(self.window);
        let mut due = Vec::new();
        for (seq, out) in self.queue.range_mut(..limit) {
            if out.sent && out.retry_at > now {
                continue;
            }
            let retransmit = out.sent;
            if retransmit {
                out.retries += 1;
            }
            out.sent = true;
            out.retry_at = now + period;
            due.push(Due {
                seq: *seq,
                segment: out.segment.clone(),
                retransmit,
            });
        }
        due
    }

    /// A segment is due again after `max` retransmissions
    pub fn exhausted(&self, now: u64, max: u32) -> bool {
        self.queue
            .values()
            .any(|out| out.sent && out.retry_at <= now && out.retries >= max)
    }

    /// Highest retry count of any segment still in flight
    pub fn max_retries(&self) -> u32 {
        self.queue.values().map(|out| out.retries).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.queue.values().filter(|out| out.sent).count()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Outcome of a received segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    New,
    Duplicate,
    /// Beyond the receive window; dropped so the sender retransmits
    OutOfWindow,
}

#[derive(Debug)]
pub struct RecvWindow {
    window: u32,
    next: u32,
    pending: BTreeMap<u32, Segment>,
}

impl RecvWindow {
    pub fn new(window: u32) -> Self {
        Self {
            window: window.clamp(1, MAX_WINDOW),
            next: 1,
            pending: BTreeMap::new(),
        }
    }

    pub fn on_segment(&mut self, seq: u32, segment: Segment) -> Accept {
        if seq < self.next || self.pending.contains_key(&seq) {
            return Accept::Duplicate;
        }
        if seq >= self.next.saturating_add(self.window) {
            return Accept::OutOfWindow;
        }
        self.pending.insert(seq, segment);
        Accept::New
    }

    /// Next in-order segment, if it has arrived
    pub fn pop(&mut self) -> Option<Segment> {
        let segment = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(segment)
    }

    /// Cumulative ack and selective bitmap describing what has arrived
    pub fn ack(&self) -> (u32, u32) {
        let mut sack = 0u32;
        for seq in self.pending.keys() {
            let offset = seq - self.next;
            if (1..=MAX_WINDOW).contains(&offset) {
                sack |= 1 << (offset - 1);
            }
        }
        (self.next, sack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &'static str) -> Segment {
        Segment::Data(Bytes::from_static(s.as_bytes()))
    }

    #[test]
    fn test_window_limits_first_flight() {
        let mut send = SendWindow::new(2);
        for _ in 0..4 {
            send.push(data("x"));
        }
        let first: Vec<u32> = send.due(0, 3).iter().map(|d| d.seq).collect();
        assert_eq!(first, vec![1, 2]);
        assert!(send.due(1, 3).is_empty());

        assert_eq!(send.on_ack(2, 0), 1);
        let next: Vec<u32> = send.due(1, 3).iter().map(|d| d.seq).collect();
        assert_eq!(next, vec![3]);
    }

    #[test]
    fn test_retransmit_after_period() {
        let mut send = SendWindow::new(32);
        send.push(data("a"));
        assert!(!send.due(0, 3)[0].retransmit);
        assert!(send.due(2, 3).is_empty());
        let again = send.due(3, 3);
        assert!(again[0].retransmit);
        assert_eq!(send.max_retries(), 1);
        assert!(!send.exhausted(5, 1));
        assert!(send.exhausted(6, 1));
    }

    #[test]
    fn test_selective_ack() {
        let mut send = SendWindow::new(32);
        for _ in 0..4 {
            send.push(data("x"));
        }
        send.due(0, 3);
        // 1 missing, 3 and 4 received
        assert_eq!(send.on_ack(1, 0b110), 2);
        assert_eq!(send.una(), 1);
        assert_eq!(send.in_flight(), 2);
        assert_eq!(send.on_ack(3, 0), 2);
        assert!(send.is_empty());
    }

    #[test]
    fn test_ack_beyond_sent_ignored() {
        let mut send = SendWindow::new(2);
        for _ in 0..3 {
            send.push(data("x"));
        }
        send.due(0, 3);
        // Seq 3 is queued but outside the window, so never sent
        assert_eq!(send.on_ack(4, 0), 0);
        assert_eq!(send.on_ack(10, 0), 0);
        assert_eq!(send.on_ack(1, 0b10), 0);
        assert_eq!(send.in_flight(), 2);

        assert_eq!(send.on_ack(3, 0), 2);
        let next: Vec<u32> = send.due(1, 3).iter().map(|d| d.seq).collect();
        assert_eq!(next, vec![3]);
        assert_eq!(send.on_ack(4, 0), 1);
        assert!(send.is_empty());
    }

    #[test]
    fn test_reorder_and_duplicates() {
        let mut recv = RecvWindow::new(32);
        assert_eq!(recv.on_segment(2, data("b")), Accept::New);
        assert_eq!(recv.pop(), None);
        assert_eq!(recv.ack(), (1, 0b1));

        assert_eq!(recv.on_segment(1, data("a")), Accept::New);
        assert_eq!(recv.on_segment(2, data("b")), Accept::Duplicate);
        assert_eq!(recv.pop(), Some(data("a")));
        assert_eq!(recv.pop(), Some(data("b")));
        assert_eq!(recv.on_segment(1, data("a")), Accept::Duplicate);
        assert_eq!(recv.ack(), (3, 0));
    }

    #[test]
    fn test_receive_window_bound() {
        let mut recv = RecvWindow::new(4);
        assert_eq!(recv.on_segment(5, data("e")), Accept::OutOfWindow);
        assert_eq!(recv.on_segment(4, data("d")), Accept::New);
    }
}

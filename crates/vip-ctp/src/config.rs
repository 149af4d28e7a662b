//! Transport configuration

use serde::{Deserialize, Serialize};

/// Largest selective-ack window the packet format can express
pub const MAX_WINDOW: u32 = 32;

/// Timing is expressed in CTP timer ticks (nominally 100 ms each).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CtpConfig {
    /// Unacknowledged messages in flight per connection (at most 32)
    pub window: u32,
    /// Fixed retransmission period
    pub retransmit_ticks: u64,
    /// Retransmissions of one message before the connection is aborted
    pub max_retries: u32,
    /// Time a closed connection keeps re-acknowledging late packets
    pub linger_ticks: u64,
    /// Largest message accepted by `write`
    pub max_payload: usize,
    pub max_connections: usize,
}

impl Default for CtpConfig {
    fn default() -> Self {
        Self {
            window: MAX_WINDOW,
            retransmit_ticks: 3,
            max_retries: 8,
            linger_ticks: 20,
            max_payload: vip_core::MAX_CSP_SIZE,
            max_connections: 256,
        }
    }
}

//! Tunnel configuration
//!
//! Times are in tunnel ticks; the runner ticks every `tick_ms`.

use serde::{Deserialize, Serialize};
use vip_transport::TcpConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub tick_ms: u64,
    /// Send KEEPALIVE after this long without output
    pub keepalive_ticks: u64,
    /// Close with `Timeout` after this long without input
    pub idle_timeout_ticks: u64,
    pub max_channels: usize,
    pub tcp: TcpConfig,
    pub lane: LaneConfig,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            keepalive_ticks: 50,
            idle_timeout_ticks: 300,
            max_channels: 1024,
            tcp: TcpConfig::default(),
            lane: LaneConfig::default(),
        }
    }
}

/// UDP lane settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub enabled: bool,
    /// Local UDP port for the lane socket (0 = ephemeral)
    pub port: u16,
    pub probe_interval_ticks: u64,
    /// Probes (or confirms) sent before giving up
    pub max_probes: u32,
    pub keepalive_ticks: u64,
    pub idle_timeout_ticks: u64,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 0,
            probe_interval_ticks: 2,
            max_probes: 10,
            keepalive_ticks: 20,
            idle_timeout_ticks: 100,
        }
    }
}

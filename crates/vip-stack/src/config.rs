//! Stack configuration
//!
//! ```toml
//! ctp_tick_ms = 100
//!
//! [[identities]]
//! address = "00000123"
//! ip = "192.168.1.20"
//!
//! [ctp]
//! max_retries = 10
//! ```

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use vip_core::LogicalAddress;
use vip_crp::CrpConfig;
use vip_ctp::CtpConfig;
use vip_tunnel::TunnelConfig;

use crate::{Result, StackError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Period of the transport timer the owner should drive
    pub ctp_tick_ms: u64,
    pub identities: Vec<IdentityConfig>,
    pub crp: CrpConfig,
    pub ctp: CtpConfig,
    pub tunnel: TunnelConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            ctp_tick_ms: 100,
            identities: Vec::new(),
            crp: CrpConfig::default(),
            ctp: CtpConfig::default(),
            tunnel: TunnelConfig::default(),
        }
    }
}

/// An identity registered at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub address: LogicalAddress,
    pub ip: Ipv4Addr,
    #[serde(default = "default_netmask")]
    pub netmask: Ipv4Addr,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_netmask() -> Ipv4Addr {
    Ipv4Addr::new(255, 255, 255, 0)
}

fn default_port() -> u16 {
    vip_core::DEFAULT_PORT
}

impl StackConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| StackError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
            .map_err(|e| StackError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| StackError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| StackError::Config(e.to_string()))
    }
}

//! Resolver configuration

use crate::cache::TtlClass;
use serde::{Deserialize, Serialize};

/// Timing is expressed in CRP timer ticks (nominally one second each).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrpConfig {
    /// Port resolution requests are broadcast to
    pub port: u16,
    /// Milliseconds per timer tick, used to convert TTL classes
    pub tick_ms: u64,
    /// TTL class used by plain `resolve`
    pub default_ttl: TtlClass,
    /// Delay before the first retransmission
    pub initial_retry_ticks: u64,
    /// Upper bound for the doubling retransmission delay
    pub max_retry_ticks: u64,
    /// Requests sent before an entry fails
    pub max_attempts: u32,
    /// How long a failed entry stays observable
    pub failed_hold_ticks: u64,
    /// Cache capacity
    pub max_entries: usize,
}

impl Default for CrpConfig {
    fn default() -> Self {
        Self {
            port: vip_core::DEFAULT_PORT,
            tick_ms: 1000,
            default_ttl: TtlClass::Min5,
            initial_retry_ticks: 1,
            max_retry_ticks: 8,
            max_attempts: 4,
            failed_hold_ticks: 10,
            max_entries: 1024,
        }
    }
}

impl CrpConfig {
    /// Lifetime of a cache entry in ticks
    pub fn ttl_ticks(&self, ttl: TtlClass) -> u64 {
        let tick_ms = self.tick_ms.max(1);
        (ttl.secs() * 1000 / tick_ms).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_ticks() {
        let config = CrpConfig::default();
        assert_eq!(config.ttl_ticks(TtlClass::Sec5), 5);
        assert_eq!(config.ttl_ticks(TtlClass::Hour18), 18 * 3600);

        let fast = CrpConfig {
            tick_ms: 100,
            ..Default::default()
        };
        assert_eq!(fast.ttl_ticks(TtlClass::Sec30), 300);
    }
}

//! Resolution cache
//!
//! At most one entry per logical address; a newer reply overwrites the
//! older mapping. Deadlines are absolute tick counts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use vip_core::LogicalAddress;

/// How long a resolved mapping may be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TtlClass {
    #[serde(rename = "5s")]
    Sec5,
    #[serde(rename = "30s")]
    Sec30,
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "30m")]
    Min30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "6h")]
    Hour6,
    #[serde(rename = "18h")]
    Hour18,
}

impl TtlClass {
    pub const ALL: [TtlClass; 8] = [
        TtlClass::Sec5,
        TtlClass::Sec30,
        TtlClass::Min1,
        TtlClass::Min5,
        TtlClass::Min30,
        TtlClass::Hour1,
        TtlClass::Hour6,
        TtlClass::Hour18,
    ];

    pub fn secs(self) -> u64 {
        match self {
            TtlClass::Sec5 => 5,
            TtlClass::Sec30 => 30,
            TtlClass::Min1 => 60,
            TtlClass::Min5 => 5 * 60,
            TtlClass::Min30 => 30 * 60,
            TtlClass::Hour1 => 3600,
            TtlClass::Hour6 => 6 * 3600,
            TtlClass::Hour18 => 18 * 3600,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(val: u8) -> Option<Self> {
        Self::ALL.get(val as usize).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    /// Request outstanding
    Pending {
        request_id: u16,
        attempts: u32,
        retry_at: u64,
        backoff: u64,
    },
    Resolved {
        addr: SocketAddr,
        expires_at: u64,
    },
    /// Retry budget exhausted; kept until `until` so pollers see it
    Failed { until: u64 },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct CacheEntry {
    pub ttl: TtlClass,
    pub state: EntryState,
}

#[derive(Debug, Default)]
pub(crate) struct Cache {
    entries: HashMap<LogicalAddress, CacheEntry>,
}

impl Cache {
    pub fn get(&self, key: &LogicalAddress) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &LogicalAddress) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    pub fn insert(&mut self, key: LogicalAddress, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, key: &LogicalAddress) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, key: &LogicalAddress) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop the resolved entry closest to expiry to make room
    pub fn evict_one(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .filter_map(|(key, entry)| match entry.state {
                EntryState::Resolved { expires_at, .. } => Some((expires_at, *key)),
                _ => None,
            })
            .min();
        match victim {
            Some((_, key)) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }

    pub fn retain(&mut self, f: impl FnMut(&LogicalAddress, &mut CacheEntry) -> bool) {
        self.entries.retain(f);
    }
}

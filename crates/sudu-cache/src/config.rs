// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Retention settings shared by the cache backends.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default retention window: 24 hours.
pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;
/// Default janitor interval: 1 hour.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// How long snapshots live and how often expired ones are evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds after which a stored snapshot reads as absent.
    pub ttl_secs: u64,
    /// Seconds between background sweeps of expired entries.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl CacheConfig {
    /// Retention window.
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Janitor interval.
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

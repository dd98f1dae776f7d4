//! Tuning knobs for the caches.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use mynostrspace_nostr::unix_now;

/// Maximum concurrent outbound profile fetches.
pub const DEFAULT_PROFILE_CONCURRENCY: usize = 5;
/// A profile fetch not resolved within this window counts as not found.
pub const DEFAULT_PROFILE_TIMEOUT_MS: u64 = 5_000;
/// Ids per chunk during bulk warmup.
pub const DEFAULT_WARMUP_CHUNK: usize = 50;
/// Profile events stamped further than this into the future are ignored.
pub const DEFAULT_MAX_CLOCK_SKEW_SECS: u64 = 900;

/// Window during which stats requests accumulate into one batch.
pub const DEFAULT_STATS_WINDOW_MS: u64 = 500;
/// Maximum event ids per relay filter in a stats batch.
pub const DEFAULT_STATS_CHUNK: usize = 10;
/// Maximum concurrent count operations.
pub const DEFAULT_COUNT_CONCURRENCY: usize = 3;
/// Manual counts resolve with a partial tally after this long.
pub const DEFAULT_COUNT_TIMEOUT_MS: u64 = 2_000;

/// Profile cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileCacheConfig {
    pub max_concurrent_fetches: usize,
    pub fetch_timeout_ms: u64,
    pub warmup_chunk_size: usize,
    pub max_clock_skew_secs: u64,
}

impl Default for ProfileCacheConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_PROFILE_CONCURRENCY,
            fetch_timeout_ms: DEFAULT_PROFILE_TIMEOUT_MS,
            warmup_chunk_size: DEFAULT_WARMUP_CHUNK,
            max_clock_skew_secs: DEFAULT_MAX_CLOCK_SKEW_SECS,
        }
    }
}

impl ProfileCacheConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Latest `created_at` a profile event may carry right now.
    pub fn latest_acceptable(&self) -> u64 {
        unix_now().saturating_add(self.max_clock_skew_secs)
    }
}

/// Stats cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsCacheConfig {
    pub batch_window_ms: u64,
    pub chunk_size: usize,
    pub max_concurrent_counts: usize,
    pub count_timeout_ms: u64,
}

impl Default for StatsCacheConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: DEFAULT_STATS_WINDOW_MS,
            chunk_size: DEFAULT_STATS_CHUNK,
            max_concurrent_counts: DEFAULT_COUNT_CONCURRENCY,
            count_timeout_ms: DEFAULT_COUNT_TIMEOUT_MS,
        }
    }
}

impl StatsCacheConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn count_timeout(&self) -> Duration {
        Duration::from_millis(self.count_timeout_ms)
    }
}

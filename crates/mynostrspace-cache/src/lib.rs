//! Shared caches for MyNostrSpace.
//!
//! This crate provides:
//! - `ProfileCache`: coalesced, throttled profile lookups with observers
//! - `StatsCache`: batched interaction counts with per-viewer flags
//! - `Limiter`: FIFO concurrency bound for outbound relay work
//! - Count strategies with server-side and manual fallbacks
//!
//! Both caches are built once per session and shared behind `Arc`. Every
//! mutation notifies the affected key's listeners synchronously; background
//! population runs on the ambient tokio runtime.

pub mod config;
pub mod count;
mod error;
mod limiter;
mod listeners;
mod profile;
mod stats;

use std::future::Future;

use tracing::warn;

pub use config::{ProfileCacheConfig, StatsCacheConfig};
pub use count::{CountStrategy, Metric, Tally, count_with_strategies, zap_amount_sats};
pub use error::CacheError;
pub use limiter::Limiter;
pub use listeners::{Listener, ListenerHandle, ListenerSet};
pub use profile::{CachedProfile, ProfileCache, ProfileCacheBuilder};
pub use stats::{EventStats, StatsCache};

/// Spawn `future` on the current runtime. Returns `false` outside a runtime.
pub(crate) fn spawn_background<F>(task: &'static str, future: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
            true
        }
        Err(_) => {
            warn!(task, "no tokio runtime available, background work skipped");
            false
        }
    }
}

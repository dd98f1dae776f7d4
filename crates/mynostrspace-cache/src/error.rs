//! Error types for the caches.

use thiserror::Error;

use mynostrspace_nostr::NostrError;

/// Errors returned to callers of the caches.
///
/// Background population never produces these; only caller-supplied input
/// (bad identifiers) does.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Identifier could not be normalized to a cache key.
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    /// Protocol-level failure.
    #[error(transparent)]
    Nostr(#[from] NostrError),
}

//! Error types for the client layer.

use thiserror::Error;

use mynostrspace_cache::CacheError;
use mynostrspace_nostr::NostrError;

/// Errors surfaced to the initiating caller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration text could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Controller was started twice.
    #[error("{0} controller already started")]
    AlreadyStarted(&'static str),

    /// The session has no signer, so it cannot act for the local user.
    #[error("no signer configured")]
    NoSigner,

    /// The session has no cipher, so direct messages are unavailable.
    #[error("no cipher configured")]
    NoCipher,

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Nostr(#[from] NostrError),
}

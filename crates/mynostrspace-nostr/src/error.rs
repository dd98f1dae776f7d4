//! Error types for relay and crypto collaborators.

use thiserror::Error;

/// Errors that can occur at the protocol boundary.
#[derive(Debug, Error)]
pub enum NostrError {
    /// Fetch, subscribe or publish was rejected by the transport.
    #[error("network error: {0}")]
    Network(String),

    /// An operation did not complete in time.
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    /// The relay set does not advertise a capability.
    #[error("unsupported capability: {0}")]
    Unsupported(&'static str),

    /// A payload could not be decrypted.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// A payload could not be encrypted.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Signing an event failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Identifier is neither a raw id nor a decodable reference.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// An event of the wrong kind was handed to a kind-specific parser.
    #[error("event {id} has unexpected kind {kind}")]
    UnexpectedKind { id: String, kind: u32 },

    /// No relay accepted a published event.
    #[error("publish rejected by {failed} of {total} relays")]
    Publish { failed: usize, total: usize },

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local persisted store failed.
    #[error("store error: {0}")]
    Store(String),

    /// Every fallback strategy failed; one message per strategy.
    #[error("all strategies failed: {}", .0.join("; "))]
    AllStrategiesFailed(Vec<String>),
}

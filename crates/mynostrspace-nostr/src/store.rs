//! Local persisted stores, consumed through their read/write contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{EventRecord, NostrError};

/// Already-materialized profile events (kind 0), readable without relays.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Stored profile events for any of `authors`. Missing authors are skipped.
    async fn load_profiles(&self, authors: &[String]) -> Result<Vec<EventRecord>, NostrError>;
}

/// A decrypted direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Id of the encrypted event.
    pub id: String,
    /// The other side of the conversation.
    pub peer: String,
    pub author: String,
    pub created_at: u64,
    pub plaintext: String,
}

/// Persisted direct messages keyed by event id.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<StoredMessage>, NostrError>;

    async fn put(&self, message: StoredMessage) -> Result<(), NostrError>;

    /// Messages with `peer`, optionally bounded by an inclusive time range.
    async fn by_peer(
        &self,
        peer: &str,
        since: Option<u64>,
        until: Option<u64>,
    ) -> Result<Vec<StoredMessage>, NostrError>;
}

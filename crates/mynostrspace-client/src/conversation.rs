//! Direct-message conversations.
//!
//! Messages are fetched in both directions, decrypted with the session's
//! cipher and persisted through the message store, which doubles as a
//! decrypt cache: a message already in the store is never decrypted again.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use mynostrspace_nostr::{
    Cipher, EventRecord, EventSource, Filter, MessageStore, Signer, StoredMessage, UnsignedEvent,
    kinds,
};

use crate::error::ClientError;

/// Loads and sends direct messages for the local participant.
pub struct ConversationLoader {
    source: Arc<dyn EventSource>,
    signer: Arc<dyn Signer>,
    cipher: Arc<dyn Cipher>,
    store: Arc<dyn MessageStore>,
}

impl ConversationLoader {
    pub fn new(
        source: Arc<dyn EventSource>,
        signer: Arc<dyn Signer>,
        cipher: Arc<dyn Cipher>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            source,
            signer,
            cipher,
            store,
        }
    }

    /// The conversation with `peer`, oldest first.
    ///
    /// Messages that fail to decrypt are left out. Relay failures propagate.
    pub async fn load(&self, peer: &str) -> Result<Vec<StoredMessage>, ClientError> {
        let me = self.signer.public_key().to_string();
        let sent = Filter::new()
            .kinds([kinds::ENCRYPTED_DIRECT_MESSAGE])
            .authors([me.clone()])
            .participant_refs([peer]);
        let received = Filter::new()
            .kinds([kinds::ENCRYPTED_DIRECT_MESSAGE])
            .authors([peer])
            .participant_refs([me.clone()]);

        let (sent, received) = tokio::try_join!(
            self.source.fetch(&sent),
            self.source.fetch(&received)
        )?;

        let mut seen = HashSet::new();
        let mut messages = Vec::new();
        for event in sent.into_iter().chain(received) {
            if !seen.insert(event.id.clone()) {
                continue;
            }
            if let Some(message) = self.open(&me, peer, &event).await {
                messages.push(message);
            }
        }

        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        debug!(peer = %peer, messages = messages.len(), "conversation loaded");
        Ok(messages)
    }

    /// Previously decrypted messages with `peer`, without touching relays.
    pub async fn cached(&self, peer: &str) -> Result<Vec<StoredMessage>, ClientError> {
        Ok(self.store.by_peer(peer, None, None).await?)
    }

    /// Encrypt, sign, publish and store a message to `peer`.
    pub async fn send(&self, peer: &str, text: &str) -> Result<StoredMessage, ClientError> {
        let me = self.signer.public_key().to_string();
        let ciphertext = self.cipher.encrypt(peer, text).await?;
        let unsigned = UnsignedEvent::new(me.clone(), kinds::ENCRYPTED_DIRECT_MESSAGE, ciphertext)
            .tag(["p", peer]);
        let event = self.signer.sign(unsigned).await?;
        self.source.publish(&event).await?.ensure_delivered()?;

        let message = StoredMessage {
            id: event.id,
            peer: peer.to_string(),
            author: me,
            created_at: event.created_at,
            plaintext: text.to_string(),
        };
        self.store.put(message.clone()).await?;
        Ok(message)
    }

    async fn open(&self, me: &str, peer: &str, event: &EventRecord) -> Option<StoredMessage> {
        match self.store.get(&event.id).await {
            Ok(Some(stored)) => return Some(stored),
            Ok(None) => {}
            Err(e) => warn!(event_id = %event.id, error = %e, "message store read failed"),
        }

        let plaintext = match self.cipher.decrypt(peer, &event.content).await {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(event_id = %event.id, peer = %peer, error = %e, "dropping undecryptable message");
                return None;
            }
        };

        let message = StoredMessage {
            id: event.id.clone(),
            peer: peer.to_string(),
            author: if event.author == me { me.to_string() } else { peer.to_string() },
            created_at: event.created_at,
            plaintext,
        };
        if let Err(e) = self.store.put(message.clone()).await {
            warn!(event_id = %event.id, error = %e, "message store write failed");
        }
        Some(message)
    }
}

//! User-initiated interactions.
//!
//! Each action signs and publishes first. Only after relays accept the event
//! is the matching cache updated, so a failed publish leaves shared state
//! untouched and the error goes back to the caller.

use std::sync::Arc;

use tracing::{info, warn};

use mynostrspace_cache::{EventStats, ProfileCache, StatsCache};
use mynostrspace_nostr::{
    EventRecord, EventSource, NostrError, ProfileDocument, Signer, UnsignedEvent, kinds,
};

use crate::error::ClientError;

pub struct Interactions {
    source: Arc<dyn EventSource>,
    signer: Arc<dyn Signer>,
    profiles: Arc<ProfileCache>,
    stats: Arc<StatsCache>,
}

impl Interactions {
    pub fn new(
        source: Arc<dyn EventSource>,
        signer: Arc<dyn Signer>,
        profiles: Arc<ProfileCache>,
        stats: Arc<StatsCache>,
    ) -> Self {
        Self {
            source,
            signer,
            profiles,
            stats,
        }
    }

    /// React to `target` with a like.
    pub async fn like(&self, target: &EventRecord) -> Result<EventStats, ClientError> {
        let unsigned = UnsignedEvent::new(self.signer.public_key(), kinds::REACTION, "+")
            .tag(["e", target.id.as_str()])
            .tag(["p", target.author.as_str()])
            .tag(["k", target.kind.to_string().as_str()]);
        self.publish(unsigned).await?;
        info!(event_id = %target.id, "liked");
        Ok(self.stats.record_like(&target.id)?)
    }

    /// Repost `target`, embedding it as the content.
    pub async fn repost(&self, target: &EventRecord) -> Result<EventStats, ClientError> {
        let kind = if target.kind == kinds::TEXT_NOTE {
            kinds::REPOST
        } else {
            kinds::GENERIC_REPOST
        };
        let content = serde_json::to_string(target).map_err(NostrError::from)?;
        let unsigned = UnsignedEvent::new(self.signer.public_key(), kind, content)
            .tag(["e", target.id.as_str()])
            .tag(["p", target.author.as_str()]);
        self.publish(unsigned).await?;
        info!(event_id = %target.id, "reposted");
        Ok(self.stats.record_repost(&target.id)?)
    }

    /// Publish a new profile for the local participant and make it visible
    /// to every profile subscriber at once.
    pub async fn publish_profile(
        &self,
        document: ProfileDocument,
    ) -> Result<EventRecord, ClientError> {
        let content = document.to_content()?;
        let unsigned = UnsignedEvent::new(self.signer.public_key(), kinds::METADATA, content);
        let event = self.publish(unsigned).await?;
        self.profiles.update(self.signer.public_key(), document)?;
        info!(event_id = %event.id, "profile published");
        Ok(event)
    }

    async fn publish(&self, unsigned: UnsignedEvent) -> Result<EventRecord, ClientError> {
        let kind = unsigned.kind;
        let event = self.signer.sign(unsigned).await?;
        let report = self.source.publish(&event).await?;
        if let Err(e) = report.clone().ensure_delivered() {
            warn!(kind, rejected = ?report.rejected, "publish rejected");
            return Err(e.into());
        }
        Ok(event)
    }
}

//! Session wiring.
//!
//! A [`Session`] owns the shared caches and hands out controllers that read
//! through them. Every controller it creates is registered for teardown, so
//! [`Session::shutdown`] closes all subscriptions at once (on logout, for
//! example) even if the caller still holds the controllers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use mynostrspace_cache::{ProfileCache, StatsCache};
use mynostrspace_nostr::{
    Cipher, EventSource, IdentifierDecoder, MemoryMessageStore, MessageStore, ProfileStore,
    RawOnly, Signer, StopHandle, normalize_identifier,
};

use crate::actions::Interactions;
use crate::config::ClientConfig;
use crate::conversation::ConversationLoader;
use crate::error::ClientError;
use crate::feed::{FeedController, FeedMode};
use crate::media::{MediaController, MediaQuery};
use crate::notifications::NotificationController;

/// Shared caches plus the controllers created from them.
pub struct Session {
    source: Arc<dyn EventSource>,
    signer: Option<Arc<dyn Signer>>,
    cipher: Option<Arc<dyn Cipher>>,
    messages: Arc<dyn MessageStore>,
    profiles: Arc<ProfileCache>,
    stats: Arc<StatsCache>,
    decoder: Arc<dyn IdentifierDecoder>,
    config: ClientConfig,
    controllers: Mutex<Vec<StopHandle>>,
    shut_down: AtomicBool,
}

impl Session {
    pub fn builder(source: Arc<dyn EventSource>) -> SessionBuilder {
        SessionBuilder::new(source)
    }

    pub fn profiles(&self) -> &Arc<ProfileCache> {
        &self.profiles
    }

    pub fn stats(&self) -> &Arc<StatsCache> {
        &self.stats
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Raw id of the signing key, if the session can act for a user.
    pub fn public_key(&self) -> Option<&str> {
        self.signer.as_deref().map(|s| s.public_key())
    }

    /// Raw id for `id`, decoded the same way the caches key it.
    pub fn normalize(&self, id: &str) -> Result<String, ClientError> {
        Ok(normalize_identifier(id, self.decoder.as_ref())?)
    }

    /// A feed controller. Author ids in `mode` may be raw or encoded.
    pub fn feed(&self, mode: FeedMode) -> Result<FeedController, ClientError> {
        let mode = mode.normalized(self.decoder.as_ref())?;
        let controller =
            FeedController::new(Arc::clone(&self.source), mode, self.config.feed.clone());
        self.register(controller.stop_handle());
        Ok(controller)
    }

    pub fn media(&self, query: MediaQuery) -> Result<MediaController, ClientError> {
        let query = query.normalized(self.decoder.as_ref())?;
        let controller =
            MediaController::new(Arc::clone(&self.source), query, self.config.media.clone());
        self.register(controller.stop_handle());
        Ok(controller)
    }

    /// Notifications for `viewer`. The viewer and every blocked id are
    /// normalized first, since the `p` tag guard compares raw ids literally.
    pub fn notifications<I, S>(
        &self,
        viewer: &str,
        blocked: I,
    ) -> Result<NotificationController, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let viewer = self.normalize(viewer)?;
        let blocked = blocked
            .into_iter()
            .map(|b| self.normalize(b.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let controller = NotificationController::new(
            Arc::clone(&self.source),
            viewer,
            blocked,
            self.config.notifications.clone(),
        );
        self.register(controller.stop_handle());
        Ok(controller)
    }

    /// Like, repost and profile publishing for the signing user.
    pub fn interactions(&self) -> Result<Interactions, ClientError> {
        let signer = self.signer.clone().ok_or(ClientError::NoSigner)?;
        Ok(Interactions::new(
            Arc::clone(&self.source),
            signer,
            Arc::clone(&self.profiles),
            Arc::clone(&self.stats),
        ))
    }

    /// Direct messages for the signing user.
    pub fn conversations(&self) -> Result<ConversationLoader, ClientError> {
        let signer = self.signer.clone().ok_or(ClientError::NoSigner)?;
        let cipher = self.cipher.clone().ok_or(ClientError::NoCipher)?;
        Ok(ConversationLoader::new(
            Arc::clone(&self.source),
            signer,
            cipher,
            Arc::clone(&self.messages),
        ))
    }

    /// Stop every controller this session created. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles = std::mem::take(
            &mut *self
                .controllers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in &handles {
            handle.stop();
        }
        info!(controllers = handles.len(), "session shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn register(&self, handle: StopHandle) {
        // Controllers created after shutdown start out stopped.
        if self.is_shut_down() {
            handle.stop();
            return;
        }
        let mut controllers = self
            .controllers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        controllers.retain(|h| !h.is_stopped());
        controllers.push(handle);
        debug!(registered = controllers.len(), "controller registered");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for a [`Session`].
pub struct SessionBuilder {
    source: Arc<dyn EventSource>,
    signer: Option<Arc<dyn Signer>>,
    cipher: Option<Arc<dyn Cipher>>,
    profile_store: Option<Arc<dyn ProfileStore>>,
    message_store: Option<Arc<dyn MessageStore>>,
    decoder: Option<Arc<dyn IdentifierDecoder>>,
    config: ClientConfig,
}

impl SessionBuilder {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self {
            source,
            signer: None,
            cipher: None,
            profile_store: None,
            message_store: None,
            decoder: None,
            config: ClientConfig::default(),
        }
    }

    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn profile_store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.profile_store = Some(store);
        self
    }

    /// Message store for decrypted direct messages. Defaults to an
    /// in-memory store.
    pub fn message_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.message_store = Some(store);
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn IdentifierDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and assemble the session.
    pub fn build(self) -> Result<Session, ClientError> {
        self.config.validate()?;

        let decoder: Arc<dyn IdentifierDecoder> =
            self.decoder.unwrap_or_else(|| Arc::new(RawOnly));

        let mut profiles = ProfileCache::builder(Arc::clone(&self.source))
            .decoder(Arc::clone(&decoder))
            .config(self.config.profiles.clone());
        if let Some(store) = self.profile_store {
            profiles = profiles.store(store);
        }

        let stats = StatsCache::with_decoder(
            Arc::clone(&self.source),
            self.config.stats.clone(),
            Arc::clone(&decoder),
        );

        let messages: Arc<dyn MessageStore> = match self.message_store {
            Some(store) => store,
            None => MemoryMessageStore::new(),
        };

        info!(
            signer = self.signer.is_some(),
            cipher = self.cipher.is_some(),
            "session ready"
        );

        Ok(Session {
            source: self.source,
            signer: self.signer,
            cipher: self.cipher,
            messages,
            profiles: profiles.build(),
            stats,
            decoder,
            config: self.config,
            controllers: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        })
    }
}

//! Profile cache.
//!
//! Maps participant ids to their latest profile document. Concurrent
//! subscribers for the same key share one in-flight fetch, outbound fetches
//! are bounded by a FIFO limiter, and every change is broadcast synchronously
//! to the key's listeners.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tracing::{debug, info, trace, warn};

use mynostrspace_nostr::{
    EventRecord, EventSource, Filter, IdentifierDecoder, ProfileDocument, ProfileStore, RawOnly,
    kinds, normalize_identifier, unix_now,
};

use crate::config::ProfileCacheConfig;
use crate::error::CacheError;
use crate::limiter::Limiter;
use crate::listeners::{ListenerHandle, ListenerSet};
use crate::spawn_background;

/// A cached profile with the timestamp of the event it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedProfile {
    pub document: ProfileDocument,
    pub created_at: u64,
}

struct ProfileEntry {
    value: Option<CachedProfile>,
    listeners: Arc<ListenerSet<ProfileDocument>>,
    /// At most one fetch per key is in flight.
    fetching: bool,
}

impl ProfileEntry {
    fn new() -> Self {
        Self {
            value: None,
            listeners: ListenerSet::new(),
            fetching: false,
        }
    }

    fn accepts(&self, candidate: &CachedProfile) -> bool {
        self.value
            .as_ref()
            .is_none_or(|current| candidate.created_at > current.created_at)
    }
}

/// Process-wide profile cache.
///
/// Construct one per session and share it behind an `Arc`.
pub struct ProfileCache {
    source: Arc<dyn EventSource>,
    store: Option<Arc<dyn ProfileStore>>,
    decoder: Arc<dyn IdentifierDecoder>,
    entries: DashMap<String, ProfileEntry>,
    limiter: Limiter,
    config: ProfileCacheConfig,
    network_fetches: AtomicUsize,
}

impl ProfileCache {
    /// Create a cache with default configuration and no local store.
    pub fn new(source: Arc<dyn EventSource>) -> Arc<Self> {
        ProfileCacheBuilder::new(source).build()
    }

    pub fn builder(source: Arc<dyn EventSource>) -> ProfileCacheBuilder {
        ProfileCacheBuilder::new(source)
    }

    /// Normalize `id` to its cache key.
    pub fn key(&self, id: &str) -> Result<String, CacheError> {
        normalize_identifier(id, self.decoder.as_ref())
            .map_err(|_| CacheError::InvalidKey(id.to_string()))
    }

    /// Cache-only read. Never touches the network.
    pub fn get(&self, id: &str) -> Option<ProfileDocument> {
        self.get_cached(id).map(|cached| cached.document)
    }

    /// Cache-only read including the source event's timestamp.
    pub fn get_cached(&self, id: &str) -> Option<CachedProfile> {
        let key = self.key(id).ok()?;
        self.entries.get(&key).and_then(|entry| entry.value.clone())
    }

    /// Register `listener` for changes to `id`'s profile.
    ///
    /// The listener is called immediately if a profile is already cached,
    /// then on every change. Absent values are never delivered. If nothing is
    /// cached and no fetch is running, a background fetch starts.
    pub fn subscribe<F>(self: &Arc<Self>, id: &str, listener: F) -> Result<ListenerHandle, CacheError>
    where
        F: Fn(&ProfileDocument) + Send + Sync + 'static,
    {
        let key = self.key(id)?;
        let listener = Arc::new(listener);

        let (handle, current, start_fetch) = {
            let mut entry = self.entries.entry(key.clone()).or_insert_with(ProfileEntry::new);
            let handle = entry.listeners.add(listener.clone());
            let current = entry.value.as_ref().map(|cached| cached.document.clone());
            let start_fetch = current.is_none() && !entry.fetching;
            if start_fetch {
                entry.fetching = true;
            }
            (handle, current, start_fetch)
        };

        match current {
            Some(document) => listener(&document),
            None if start_fetch => self.spawn_fetch(key),
            None => trace!(key = %key, "profile fetch coalesced"),
        }

        Ok(handle)
    }

    /// Fetch `id` again even if a profile is cached. Coalesces with any fetch
    /// already running.
    pub fn refresh(self: &Arc<Self>, id: &str) -> Result<(), CacheError> {
        let key = self.key(id)?;
        let start_fetch = {
            let mut entry = self.entries.entry(key.clone()).or_insert_with(ProfileEntry::new);
            let start = !entry.fetching;
            entry.fetching = true;
            start
        };
        if start_fetch {
            self.spawn_fetch(key);
        }
        Ok(())
    }

    /// Local override, e.g. after the viewer edits their own profile.
    ///
    /// Always replaces the cached value and notifies listeners before
    /// returning.
    pub fn update(&self, id: &str, document: ProfileDocument) -> Result<(), CacheError> {
        let key = self.key(id)?;
        let listeners = {
            let mut entry = self.entries.entry(key).or_insert_with(ProfileEntry::new);
            let created_at = entry
                .value
                .as_ref()
                .map_or(unix_now(), |current| {
                    unix_now().max(current.created_at.saturating_add(1))
                });
            entry.value = Some(CachedProfile {
                document: document.clone(),
                created_at,
            });
            Arc::clone(&entry.listeners)
        };
        listeners.notify(&document);
        Ok(())
    }

    /// Offer a profile event seen elsewhere (a feed, a warmup store).
    ///
    /// Returns `true` if it replaced the cached profile.
    pub fn ingest(&self, event: &EventRecord) -> bool {
        if event.kind != kinds::METADATA {
            return false;
        }
        let Ok(key) = self.key(&event.author) else {
            return false;
        };
        if event.created_at > self.config.latest_acceptable() {
            debug!(
                event_id = %event.id,
                created_at = event.created_at,
                "ignoring future-dated profile event"
            );
            return false;
        }
        match ProfileDocument::from_event(event) {
            Ok(document) => self.store_if_newer(
                &key,
                CachedProfile {
                    document,
                    created_at: event.created_at,
                },
            ),
            Err(e) => {
                debug!(event_id = %event.id, error = %e, "ignoring malformed profile event");
                false
            }
        }
    }

    /// Prime the cache from the local profile store without touching relays.
    ///
    /// Ids are processed in chunks with a yield between chunks. Returns the
    /// number of profiles loaded. Without a store this is a no-op.
    pub async fn warm_up<I, S>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(store) = self.store.as_ref() else {
            debug!("no profile store configured, skipping warmup");
            return 0;
        };

        let mut seen = HashSet::new();
        let keys: Vec<String> = ids
            .into_iter()
            .filter_map(|id| self.key(id.as_ref()).ok())
            .filter(|key| seen.insert(key.clone()))
            .filter(|key| {
                self.entries
                    .get(key)
                    .is_none_or(|entry| entry.value.is_none())
            })
            .collect();

        let mut loaded = 0;
        for chunk in keys.chunks(self.config.warmup_chunk_size.max(1)) {
            match store.load_profiles(chunk).await {
                Ok(events) => {
                    loaded += events.iter().filter(|e| self.ingest(e)).count();
                }
                Err(e) => warn!(error = %e, chunk = chunk.len(), "profile warmup chunk failed"),
            }
            tokio::task::yield_now().await;
        }

        info!(requested = keys.len(), loaded, "profile warmup complete");
        loaded
    }

    /// Whether a fetch for `id` is running.
    pub fn is_fetching(&self, id: &str) -> bool {
        self.key(id)
            .ok()
            .and_then(|key| self.entries.get(&key).map(|entry| entry.fetching))
            .unwrap_or(false)
    }

    /// Total relay fetches issued.
    pub fn network_fetches(&self) -> usize {
        self.network_fetches.load(Ordering::SeqCst)
    }

    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn spawn_fetch(self: &Arc<Self>, key: String) {
        let cache = Arc::clone(self);
        let task_key = key.clone();
        if !spawn_background("profile fetch", async move { cache.fetch(task_key).await }) {
            if let Some(mut entry) = self.entries.get_mut(&key) {
                entry.fetching = false;
            }
        }
    }

    async fn fetch(&self, key: String) {
        let filter = Filter::new()
            .kinds([kinds::METADATA])
            .authors([key.clone()])
            .until(self.config.latest_acceptable())
            .limit(1);
        let timeout = self.config.fetch_timeout();

        let result = self
            .limiter
            .run(async {
                self.network_fetches.fetch_add(1, Ordering::SeqCst);
                tokio::time::timeout(timeout, self.source.fetch(&filter)).await
            })
            .await;

        let found = match result {
            Ok(Ok(events)) => newest_profile(&key, &events, self.config.latest_acceptable()),
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "profile fetch failed");
                None
            }
            Err(_) => {
                debug!(
                    key = %key,
                    timeout_ms = self.config.fetch_timeout_ms,
                    "profile fetch timed out, treating as not found"
                );
                None
            }
        };

        self.finish_fetch(&key, found);
    }

    fn finish_fetch(&self, key: &str, found: Option<CachedProfile>) {
        let notify = {
            let mut entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(ProfileEntry::new);
            entry.fetching = false;
            match found {
                Some(candidate) if entry.accepts(&candidate) => {
                    entry.value = Some(candidate.clone());
                    Some((Arc::clone(&entry.listeners), candidate.document))
                }
                _ => None,
            }
        };

        if let Some((listeners, document)) = notify {
            trace!(key = %key, listeners = listeners.len(), "profile resolved");
            listeners.notify(&document);
        }
    }

    fn store_if_newer(&self, key: &str, candidate: CachedProfile) -> bool {
        let listeners = {
            let mut entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(ProfileEntry::new);
            if !entry.accepts(&candidate) {
                return false;
            }
            entry.value = Some(candidate.clone());
            Arc::clone(&entry.listeners)
        };
        listeners.notify(&candidate.document);
        true
    }
}

/// Newest parseable profile authored by `key` among `events`, ignoring
/// anything stamped after `latest`.
fn newest_profile(key: &str, events: &[EventRecord], latest: u64) -> Option<CachedProfile> {
    let event = events
        .iter()
        .filter(|e| e.kind == kinds::METADATA && e.author.eq_ignore_ascii_case(key))
        .filter(|e| e.created_at <= latest)
        .max_by_key(|e| e.created_at)?;

    match ProfileDocument::from_event(event) {
        Ok(document) => Some(CachedProfile {
            document,
            created_at: event.created_at,
        }),
        Err(e) => {
            warn!(key = %key, event_id = %event.id, error = %e, "malformed profile content");
            None
        }
    }
}

/// Builder for a [`ProfileCache`].
pub struct ProfileCacheBuilder {
    source: Arc<dyn EventSource>,
    store: Option<Arc<dyn ProfileStore>>,
    decoder: Option<Arc<dyn IdentifierDecoder>>,
    config: ProfileCacheConfig,
}

impl ProfileCacheBuilder {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self {
            source,
            store: None,
            decoder: None,
            config: ProfileCacheConfig::default(),
        }
    }

    /// Local store used by [`ProfileCache::warm_up`].
    pub fn store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Decoder for encoded participant references.
    pub fn decoder(mut self, decoder: Arc<dyn IdentifierDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn config(mut self, config: ProfileCacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Arc<ProfileCache> {
        Arc::new(ProfileCache {
            source: self.source,
            store: self.store,
            decoder: self.decoder.unwrap_or_else(|| Arc::new(RawOnly)),
            entries: DashMap::new(),
            limiter: Limiter::new("profiles", self.config.max_concurrent_fetches),
            config: self.config,
            network_fetches: AtomicUsize::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mynostrspace_nostr::MemorySource;
    use pretty_assertions::assert_eq;

    fn pk(n: u8) -> String {
        format!("{:064x}", n)
    }

    fn profile_event(author: &str, created_at: u64, name: &str) -> EventRecord {
        EventRecord {
            id: format!("{author}-{created_at}"),
            author: author.to_string(),
            kind: kinds::METADATA,
            created_at,
            tags: vec![],
            content: format!(r#"{{"name":"{name}"}}"#),
            sig: String::new(),
        }
    }

    #[test]
    fn test_get_is_cache_only() {
        let source = MemorySource::new();
        let cache = ProfileCache::new(source.clone());
        assert_eq!(cache.get(&pk(1)), None);
        assert_eq!(source.fetch_calls(), 0);
    }

    #[test]
    fn test_ingest_keeps_newest() {
        let cache = ProfileCache::new(MemorySource::new());
        let alice = pk(1);

        assert!(cache.ingest(&profile_event(&alice, 10, "new")));
        assert!(!cache.ingest(&profile_event(&alice, 5, "old")));
        assert!(!cache.ingest(&profile_event(&alice, 10, "same-age")));
        assert_eq!(cache.get(&alice), Some(ProfileDocument::named("new")));
    }

    #[test]
    fn test_ingest_ignores_other_kinds_and_bad_content() {
        let cache = ProfileCache::new(MemorySource::new());
        let mut note = profile_event(&pk(1), 1, "x");
        note.kind = kinds::TEXT_NOTE;
        assert!(!cache.ingest(&note));

        let mut broken = profile_event(&pk(1), 1, "x");
        broken.content = "{".to_string();
        assert!(!cache.ingest(&broken));
        assert!(cache.get(&pk(1)).is_none());
    }

    #[test]
    fn test_update_overrides_newer_fetched_value() {
        let cache = ProfileCache::new(MemorySource::new());
        let me = pk(9);
        let ahead = unix_now() + 600;
        assert!(cache.ingest(&profile_event(&me, ahead, "relay")));

        cache.update(&me, ProfileDocument::named("edited")).unwrap();
        let cached = cache.get_cached(&me).unwrap();
        assert_eq!(cached.document, ProfileDocument::named("edited"));
        assert!(cached.created_at > ahead);
    }

    #[test]
    fn test_far_future_profile_is_ignored() {
        let cache = ProfileCache::new(MemorySource::new());
        let me = pk(9);
        assert!(cache.ingest(&profile_event(&me, 100, "honest")));
        assert!(!cache.ingest(&profile_event(&me, u64::MAX, "forged")));
        assert!(cache.ingest(&profile_event(&me, 200, "later")));
        assert_eq!(cache.get(&me), Some(ProfileDocument::named("later")));
    }

    #[test]
    fn test_update_after_max_timestamp_does_not_overflow() {
        let cache = ProfileCache::builder(MemorySource::new())
            .config(ProfileCacheConfig {
                max_clock_skew_secs: u64::MAX,
                ..ProfileCacheConfig::default()
            })
            .build();
        let me = pk(9);
        assert!(cache.ingest(&profile_event(&me, u64::MAX, "relay")));

        cache.update(&me, ProfileDocument::named("mine")).unwrap();
        let cached = cache.get_cached(&me).unwrap();
        assert_eq!(cached.document, ProfileDocument::named("mine"));
        assert_eq!(cached.created_at, u64::MAX);
    }

    #[test]
    fn test_newest_profile_skips_future_dated_events() {
        let me = pk(3);
        let events = vec![
            profile_event(&me, 50, "real"),
            profile_event(&me, 10_000, "forged"),
        ];
        let found = newest_profile(&me, &events, 1_000).unwrap();
        assert_eq!(found.document, ProfileDocument::named("real"));
        assert_eq!(found.created_at, 50);
    }

    #[test]
    fn test_invalid_key_is_rejected() {
        let cache = ProfileCache::new(MemorySource::new());
        assert!(matches!(
            cache.update("not-an-id", ProfileDocument::default()),
            Err(CacheError::InvalidKey(_))
        ));
        assert_eq!(cache.get("not-an-id"), None);
    }
}

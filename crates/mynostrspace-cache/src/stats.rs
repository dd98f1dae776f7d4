//! Interaction stats cache.
//!
//! Requests for event stats accumulate for a short window and are then
//! resolved together: ids are grouped by viewer, split into chunks, and each
//! chunk issues one query for the viewer's own likes and reposts plus one
//! count operation per metric per event. Count operations share a FIFO
//! limiter. Failures are logged and leave the affected fields unchanged.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use mynostrspace_nostr::{
    EventSource, Filter, IdentifierDecoder, RawOnly, kinds, normalize_identifier,
};

use crate::config::StatsCacheConfig;
use crate::count::{Metric, Tally, count_with_strategies};
use crate::error::CacheError;
use crate::limiter::Limiter;
use crate::listeners::{ListenerHandle, ListenerSet};
use crate::spawn_background;

/// Interaction counts for one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    pub like_count: u64,
    pub comment_count: u64,
    pub repost_count: u64,
    pub zap_sats_total: u64,
    pub liked_by_self: bool,
    pub reposted_by_self: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    Unrequested,
    Queued,
    Loaded,
}

struct StatsEntry {
    value: EventStats,
    load: LoadState,
    listeners: Arc<ListenerSet<EventStats>>,
}

impl StatsEntry {
    fn new() -> Self {
        Self {
            value: EventStats::default(),
            load: LoadState::Unrequested,
            listeners: ListenerSet::new(),
        }
    }
}

#[derive(Default)]
struct PendingBatch {
    /// Queued ids grouped by viewer, in arrival order.
    groups: Vec<(Option<String>, Vec<String>)>,
    timer_armed: bool,
}

/// What one count pass produced for an event. `None` means the metric failed.
#[derive(Debug, Default)]
struct FetchedCounts {
    likes: Option<Tally>,
    comments: Option<Tally>,
    reposts: Option<Tally>,
    zaps: Option<Tally>,
}

#[derive(Debug, Default)]
struct OwnInteractions {
    liked: HashSet<String>,
    reposted: HashSet<String>,
}

/// Process-wide interaction stats cache.
pub struct StatsCache {
    source: Arc<dyn EventSource>,
    decoder: Arc<dyn IdentifierDecoder>,
    entries: DashMap<String, StatsEntry>,
    pending: Mutex<PendingBatch>,
    limiter: Limiter,
    config: StatsCacheConfig,
    batches: AtomicUsize,
    chunks: AtomicUsize,
}

impl StatsCache {
    pub fn new(source: Arc<dyn EventSource>) -> Arc<Self> {
        Self::with_config(source, StatsCacheConfig::default())
    }

    pub fn with_config(source: Arc<dyn EventSource>, config: StatsCacheConfig) -> Arc<Self> {
        Self::with_decoder(source, config, Arc::new(RawOnly))
    }

    pub fn with_decoder(
        source: Arc<dyn EventSource>,
        config: StatsCacheConfig,
        decoder: Arc<dyn IdentifierDecoder>,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            decoder,
            entries: DashMap::new(),
            pending: Mutex::new(PendingBatch::default()),
            limiter: Limiter::new("counts", config.max_concurrent_counts),
            config,
            batches: AtomicUsize::new(0),
            chunks: AtomicUsize::new(0),
        })
    }

    fn key(&self, id: &str) -> Result<String, CacheError> {
        normalize_identifier(id, self.decoder.as_ref())
            .map_err(|_| CacheError::InvalidKey(id.to_string()))
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingBatch> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current stats for `event_id`, if an entry exists.
    pub fn get(&self, event_id: &str) -> Option<EventStats> {
        let key = self.key(event_id).ok()?;
        self.entries.get(&key).map(|entry| entry.value)
    }

    /// Register `listener` for `event_id`'s stats.
    ///
    /// The listener is called immediately with the current value (zeroes if
    /// nothing has been loaded), then on every change. The first subscription
    /// for an event queues it for the next batch; `viewer` personalizes the
    /// `*_by_self` flags.
    pub fn subscribe<F>(
        self: &Arc<Self>,
        event_id: &str,
        viewer: Option<&str>,
        listener: F,
    ) -> Result<ListenerHandle, CacheError>
    where
        F: Fn(&EventStats) + Send + Sync + 'static,
    {
        let key = self.key(event_id)?;
        let viewer = viewer.map(|v| self.key(v)).transpose()?;
        let listener = Arc::new(listener);

        let (handle, current, enqueue) = {
            let mut entry = self.entries.entry(key.clone()).or_insert_with(StatsEntry::new);
            let handle = entry.listeners.add(listener.clone());
            let enqueue = entry.load == LoadState::Unrequested;
            if enqueue {
                entry.load = LoadState::Queued;
            }
            (handle, entry.value, enqueue)
        };

        listener(&current);
        if enqueue {
            self.enqueue(key, viewer);
        }
        Ok(handle)
    }

    /// Apply a local change and notify listeners before returning.
    ///
    /// `*_by_self` flags that are already set stay set.
    pub fn update<F>(&self, event_id: &str, updater: F) -> Result<EventStats, CacheError>
    where
        F: FnOnce(EventStats) -> EventStats,
    {
        let key = self.key(event_id)?;
        let (listeners, value) = {
            let mut entry = self.entries.entry(key).or_insert_with(StatsEntry::new);
            let previous = entry.value;
            let mut next = updater(previous);
            next.liked_by_self |= previous.liked_by_self;
            next.reposted_by_self |= previous.reposted_by_self;
            entry.value = next;
            (Arc::clone(&entry.listeners), next)
        };
        listeners.notify(&value);
        Ok(value)
    }

    /// Optimistically record a like by the viewer. No-op if already liked.
    pub fn record_like(&self, event_id: &str) -> Result<EventStats, CacheError> {
        self.update(event_id, |stats| {
            if stats.liked_by_self {
                stats
            } else {
                EventStats {
                    like_count: stats.like_count + 1,
                    liked_by_self: true,
                    ..stats
                }
            }
        })
    }

    /// Optimistically record a repost by the viewer. No-op if already reposted.
    pub fn record_repost(&self, event_id: &str) -> Result<EventStats, CacheError> {
        self.update(event_id, |stats| {
            if stats.reposted_by_self {
                stats
            } else {
                EventStats {
                    repost_count: stats.repost_count + 1,
                    reposted_by_self: true,
                    ..stats
                }
            }
        })
    }

    /// Resolve everything queued now instead of waiting for the window.
    pub async fn flush(&self) {
        self.process_batch().await;
    }

    /// Number of batches processed.
    pub fn batches_processed(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Number of chunks processed across all batches.
    pub fn chunks_processed(&self) -> usize {
        self.chunks.load(Ordering::SeqCst)
    }

    /// Ids waiting for the next batch.
    pub fn pending_len(&self) -> usize {
        self.lock_pending()
            .groups
            .iter()
            .map(|(_, ids)| ids.len())
            .sum()
    }

    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    fn enqueue(self: &Arc<Self>, key: String, viewer: Option<String>) {
        let arm = {
            let mut pending = self.lock_pending();
            match pending.groups.iter_mut().find(|(v, _)| *v == viewer) {
                Some((_, ids)) => ids.push(key),
                None => pending.groups.push((viewer, vec![key])),
            }
            !std::mem::replace(&mut pending.timer_armed, true)
        };
        if !arm {
            return;
        }

        let cache = Arc::clone(self);
        let window = self.config.batch_window();
        let timer = async move {
            tokio::time::sleep(window).await;
            cache.process_batch().await;
        };
        if !spawn_background("stats batch", timer) {
            self.lock_pending().timer_armed = false;
        }
    }

    async fn process_batch(&self) {
        let groups = {
            let mut pending = self.lock_pending();
            pending.timer_armed = false;
            std::mem::take(&mut pending.groups)
        };
        if groups.is_empty() {
            return;
        }
        self.batches.fetch_add(1, Ordering::SeqCst);

        let chunk_size = self.config.chunk_size.max(1);
        let work: Vec<_> = groups
            .iter()
            .flat_map(|(viewer, ids)| {
                ids.chunks(chunk_size)
                    .map(move |chunk| self.process_chunk(viewer.as_deref(), chunk))
            })
            .collect();

        debug!(
            viewers = groups.len(),
            chunks = work.len(),
            "resolving stats batch"
        );
        join_all(work).await;
    }

    async fn process_chunk(&self, viewer: Option<&str>, ids: &[String]) {
        self.chunks.fetch_add(1, Ordering::SeqCst);

        let own = async {
            match viewer {
                Some(viewer) => self.fetch_own_interactions(viewer, ids).await,
                None => OwnInteractions::default(),
            }
        };
        let counts = join_all(ids.iter().map(|id| self.count_event(id)));
        let (own, counts) = tokio::join!(own, counts);

        for (id, fetched) in ids.iter().zip(counts) {
            self.apply_fetched(
                id,
                fetched,
                own.liked.contains(id),
                own.reposted.contains(id),
            );
        }
    }

    async fn fetch_own_interactions(&self, viewer: &str, ids: &[String]) -> OwnInteractions {
        let filter = Filter::new()
            .kinds([kinds::REACTION, kinds::REPOST, kinds::GENERIC_REPOST])
            .event_refs(ids.iter().cloned())
            .authors([viewer.to_string()]);

        let events = match self.source.fetch(&filter).await {
            Ok(events) => events,
            Err(e) => {
                warn!(viewer = %viewer, error = %e, "own interaction query failed");
                return OwnInteractions::default();
            }
        };

        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut own = OwnInteractions::default();
        for event in events.iter().filter(|e| e.author == viewer) {
            let targets = event
                .tag_values("e")
                .filter(|id| wanted.contains(id))
                .map(str::to_string);
            match event.kind {
                kinds::REACTION if event.content.trim() != "-" => own.liked.extend(targets),
                kinds::REPOST | kinds::GENERIC_REPOST => own.reposted.extend(targets),
                _ => {}
            }
        }
        own
    }

    async fn count_event(&self, id: &str) -> FetchedCounts {
        let (likes, comments, reposts, zaps) = tokio::join!(
            self.count_metric(id, Metric::Likes),
            self.count_metric(id, Metric::Comments),
            self.count_metric(id, Metric::Reposts),
            self.count_metric(id, Metric::Zaps),
        );
        FetchedCounts {
            likes,
            comments,
            reposts,
            zaps,
        }
    }

    async fn count_metric(&self, id: &str, metric: Metric) -> Option<Tally> {
        let filter = metric.filter(id);
        let timeout = self.config.count_timeout();
        let result = self
            .limiter
            .run(count_with_strategies(
                self.source.as_ref(),
                &filter,
                metric.strategies(),
                timeout,
            ))
            .await;

        match result {
            Ok(tally) => Some(tally),
            Err(e) => {
                warn!(event_id = %id, metric = ?metric, error = %e, "count failed");
                None
            }
        }
    }

    /// Merge fetched counts into the cached entry.
    ///
    /// Counts only ever grow, so an optimistic local increment is not undone
    /// by a count that raced ahead of relay propagation.
    fn apply_fetched(&self, id: &str, fetched: FetchedCounts, liked: bool, reposted: bool) {
        let notify = {
            let mut entry = self
                .entries
                .entry(id.to_string())
                .or_insert_with(StatsEntry::new);
            entry.load = LoadState::Loaded;

            let previous = entry.value;
            let mut next = previous;
            if let Some(t) = fetched.likes {
                next.like_count = next.like_count.max(t.events);
            }
            if let Some(t) = fetched.comments {
                next.comment_count = next.comment_count.max(t.events);
            }
            if let Some(t) = fetched.reposts {
                next.repost_count = next.repost_count.max(t.events);
            }
            if let Some(t) = fetched.zaps {
                next.zap_sats_total = next.zap_sats_total.max(t.sats);
            }
            next.liked_by_self |= liked;
            next.reposted_by_self |= reposted;

            entry.value = next;
            (next != previous).then(|| (Arc::clone(&entry.listeners), next))
        };

        match notify {
            Some((listeners, value)) => listeners.notify(&value),
            None => trace!(event_id = %id, "stats unchanged after fetch"),
        }
    }
}

//! Home and profile feeds.
//!
//! A `FeedController` owns one relay subscription for one (viewer, mode)
//! activation and maintains three collections: root posts, replies, and a
//! pending buffer of root posts that arrived after history completed. The
//! viewer pulls pending posts in with [`FeedController::flush_pending`] so
//! content does not shift under them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use mynostrspace_nostr::{
    EventRecord, EventSource, Filter, IdentifierDecoder, NostrError, StopHandle, kinds,
    normalize_identifier,
};

use crate::config::FeedConfig;
use crate::error::ClientError;
use crate::stream::{FrameSink, PageGuard, Phase, pump};
use crate::timeline::Timeline;

/// What a feed shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMode {
    /// Posts by the accounts the viewer follows.
    Following(Vec<String>),
    /// Posts by one participant.
    Author(String),
    /// Everything the relays offer.
    Global,
    /// Posts carrying a hashtag.
    Hashtag(String),
}

impl FeedMode {
    /// Rewrite author ids to the raw form relays match on.
    pub fn normalized(self, decoder: &dyn IdentifierDecoder) -> Result<Self, NostrError> {
        Ok(match self {
            FeedMode::Following(authors) => FeedMode::Following(
                authors
                    .iter()
                    .map(|a| normalize_identifier(a, decoder))
                    .collect::<Result<_, _>>()?,
            ),
            FeedMode::Author(author) => FeedMode::Author(normalize_identifier(&author, decoder)?),
            other => other,
        })
    }

    fn filter(&self) -> Filter {
        let filter = Filter::new().kinds([kinds::TEXT_NOTE, kinds::REPOST]);
        match self {
            FeedMode::Following(authors) => filter.authors(authors.iter().cloned()),
            FeedMode::Author(author) => filter.authors([author.clone()]),
            FeedMode::Global => filter,
            FeedMode::Hashtag(tag) => filter.tag('t', [tag.to_lowercase()]),
        }
    }
}

/// Result of [`FeedController::load_more`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMoreOutcome {
    /// A page arrived and this many of its events were retained.
    Loaded(usize),
    /// The relays returned nothing older; pagination is finished.
    Exhausted,
    /// The view is at its cap and the page was too old to keep. Pagination
    /// is finished.
    Full,
    /// Another page request is still running.
    AlreadyLoading,
}

/// Immutable view of a feed, published on every change.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    pub phase: Phase,
    pub posts: Vec<Arc<EventRecord>>,
    pub replies: Vec<Arc<EventRecord>>,
    pub pending: Vec<Arc<EventRecord>>,
    pub has_more: bool,
}

impl FeedSnapshot {
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

struct FeedState {
    phase: Phase,
    posts: Timeline,
    replies: Timeline,
    pending: Timeline,
    /// Upper bound (`until`) for the next page.
    cursor: Option<u64>,
    has_more: bool,
}

impl FeedState {
    fn new(cap: usize) -> Self {
        Self {
            phase: Phase::Idle,
            posts: Timeline::new(cap),
            replies: Timeline::new(cap),
            pending: Timeline::new(cap),
            cursor: None,
            has_more: true,
        }
    }

    fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            phase: self.phase,
            posts: self.posts.to_vec(),
            replies: self.replies.to_vec(),
            pending: self.pending.to_vec(),
            has_more: self.has_more,
        }
    }

    /// Route one event by phase and reply status. Returns whether anything
    /// changed.
    fn ingest(&mut self, event: Arc<EventRecord>) -> bool {
        if event.is_reply() {
            return self.replies.insert(event);
        }
        match self.phase {
            Phase::Loading => self.posts.insert(event),
            Phase::Live if self.posts.contains(&event.id) => false,
            Phase::Live => self.pending.insert(event),
            Phase::Idle | Phase::Stopped => false,
        }
    }
}

struct FeedInner {
    source: Arc<dyn EventSource>,
    mode: FeedMode,
    config: FeedConfig,
    state: Mutex<FeedState>,
    snapshots: watch::Sender<FeedSnapshot>,
    loading_more: AtomicBool,
    stop: StopHandle,
    stop_rx: watch::Receiver<bool>,
}

impl FeedInner {
    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &FeedState) {
        self.snapshots.send_replace(state.snapshot());
    }
}

impl FrameSink for FeedInner {
    fn apply_frame(&self, events: Vec<EventRecord>) {
        let mut state = self.lock();
        let changed = events
            .into_iter()
            .map(Arc::new)
            .filter(|event| state.ingest(Arc::clone(event)))
            .count();
        if changed > 0 {
            self.publish(&state);
        }
    }

    fn end_of_stored_events(&self) {
        let mut state = self.lock();
        if state.phase != Phase::Loading {
            return;
        }
        state.phase = Phase::Live;
        state.cursor = state.posts.oldest_created_at();
        debug!(
            posts = state.posts.len(),
            replies = state.replies.len(),
            cursor = ?state.cursor,
            "feed history complete"
        );
        self.publish(&state);
    }

    fn closed(&self) {
        let mut state = self.lock();
        if state.phase != Phase::Stopped {
            state.phase = Phase::Stopped;
            self.publish(&state);
        }
    }
}

/// Subscription controller for one feed activation.
pub struct FeedController {
    inner: Arc<FeedInner>,
}

impl FeedController {
    pub fn new(source: Arc<dyn EventSource>, mode: FeedMode, config: FeedConfig) -> Self {
        let state = FeedState::new(config.cap);
        let (snapshots, _) = watch::channel(state.snapshot());
        let (stop, stop_rx) = StopHandle::new();
        Self {
            inner: Arc::new(FeedInner {
                source,
                mode,
                config,
                state: Mutex::new(state),
                snapshots,
                loading_more: AtomicBool::new(false),
                stop,
                stop_rx,
            }),
        }
    }

    /// Open the subscription and begin loading history.
    pub async fn start(&self) -> Result<(), ClientError> {
        {
            let mut state = self.inner.lock();
            if state.phase != Phase::Idle {
                return Err(ClientError::AlreadyStarted("feed"));
            }
            state.phase = Phase::Loading;
            self.inner.publish(&state);
        }

        let filter = self.inner.mode.filter().limit(self.inner.config.initial_limit);
        let subscription = match self.inner.source.subscribe(filter).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(mode = ?self.inner.mode, error = %e, "feed subscription failed");
                let mut state = self.inner.lock();
                if state.phase == Phase::Loading {
                    state.phase = Phase::Idle;
                    self.inner.publish(&state);
                }
                return Err(e.into());
            }
        };

        info!(mode = ?self.inner.mode, "feed started");
        tokio::spawn(pump(
            Arc::clone(&self.inner),
            subscription,
            self.inner.stop_rx.clone(),
            self.inner.config.frame_interval(),
        ));
        Ok(())
    }

    /// Stop the subscription. Idempotent.
    pub fn stop(&self) {
        self.inner.stop.stop();
        let mut state = self.inner.lock();
        if state.phase != Phase::Stopped {
            state.phase = Phase::Stopped;
            self.inner.publish(&state);
            debug!(mode = ?self.inner.mode, "feed stopped");
        }
    }

    /// Move pending posts into the visible timeline. Returns how many moved.
    pub fn flush_pending(&self) -> usize {
        let mut state = self.inner.lock();
        if state.pending.is_empty() {
            return 0;
        }
        let pending = state.pending.take();
        let moved = state.posts.extend(pending);
        self.inner.publish(&state);
        moved
    }

    /// Fetch the next older page.
    ///
    /// Overlapping calls are no-ops while a page is in flight. An empty page
    /// marks the feed exhausted, and so does a page that a full timeline
    /// cannot retain.
    pub async fn load_more(&self) -> Result<LoadMoreOutcome, ClientError> {
        let Some(_guard) = PageGuard::try_acquire(&self.inner.loading_more) else {
            return Ok(LoadMoreOutcome::AlreadyLoading);
        };

        let cursor = {
            let state = self.inner.lock();
            if !state.has_more {
                return Ok(LoadMoreOutcome::Exhausted);
            }
            state.cursor.or_else(|| state.posts.oldest_created_at())
        };

        let mut filter = self.inner.mode.filter().limit(self.inner.config.page_size);
        if let Some(until) = cursor {
            filter = filter.until(until);
        }
        let page = self.inner.source.fetch(&filter).await?;

        let mut state = self.inner.lock();
        let Some(oldest) = page.iter().map(|e| e.created_at).min() else {
            state.has_more = false;
            self.inner.publish(&state);
            debug!(mode = ?self.inner.mode, "feed exhausted");
            return Ok(LoadMoreOutcome::Exhausted);
        };

        let mut retained = 0;
        for event in page.into_iter().map(Arc::new) {
            let inserted = if event.is_reply() {
                state.replies.insert(event)
            } else if !state.pending.contains(&event.id) {
                state.posts.insert(event)
            } else {
                false
            };
            retained += usize::from(inserted);
        }

        if retained == 0 && state.posts.is_full() {
            state.has_more = false;
            self.inner.publish(&state);
            debug!(mode = ?self.inner.mode, cap = state.posts.cap(), "feed timeline full");
            return Ok(LoadMoreOutcome::Full);
        }

        state.cursor = Some(oldest.saturating_sub(1));
        self.inner.publish(&state);
        Ok(LoadMoreOutcome::Loaded(retained))
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.inner.lock().snapshot()
    }

    /// Receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<FeedSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Whether a `load_more` page is in flight.
    pub fn is_loading_more(&self) -> bool {
        self.inner.loading_more.load(Ordering::SeqCst)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.inner.stop.clone()
    }
}

impl Drop for FeedController {
    fn drop(&mut self) {
        self.inner.stop.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn note(id: &str, created_at: u64, tags: Vec<Vec<&str>>) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            author: "alice".to_string(),
            kind: kinds::TEXT_NOTE,
            created_at,
            tags: tags
                .into_iter()
                .map(|t| t.into_iter().map(String::from).collect())
                .collect(),
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn test_state_routes_by_phase() {
        let mut state = FeedState::new(10);
        state.phase = Phase::Loading;
        assert!(state.ingest(Arc::new(note("a", 1, vec![]))));
        assert!(state.ingest(Arc::new(note("r", 2, vec![vec!["e", "a"]]))));

        state.phase = Phase::Live;
        assert!(state.ingest(Arc::new(note("b", 3, vec![]))));
        assert!(!state.ingest(Arc::new(note("a", 1, vec![]))));
        assert!(state.ingest(Arc::new(note("r2", 4, vec![vec!["e", "b", "", "reply"]]))));

        assert_eq!(state.posts.len(), 1);
        assert_eq!(state.pending.len(), 1);
        assert_eq!(state.replies.len(), 2);
    }

    #[test]
    fn test_stopped_state_ignores_events() {
        let mut state = FeedState::new(10);
        state.phase = Phase::Stopped;
        assert!(!state.ingest(Arc::new(note("a", 1, vec![]))));
        assert!(state.posts.is_empty());
    }

    #[test]
    fn test_hashtag_filter_is_lowercased() {
        let filter = FeedMode::Hashtag("Nostr".to_string()).filter();
        assert_eq!(filter.tags.get(&'t'), Some(&vec!["nostr".to_string()]));
    }
}

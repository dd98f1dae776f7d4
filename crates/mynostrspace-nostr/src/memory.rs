//! In-process implementations of the collaborator traits.
//!
//! `MemorySource` behaves like a single well-behaved relay: it answers
//! fetches from its stored events, replays history then end-of-stored-events
//! on subscribe, and pushes injected events to matching live subscriptions.
//! It also records every call so callers can assert coalescing, batching and
//! concurrency bounds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::{
    EventRecord, EventSource, Filter, MessageStore, NostrError, ProfileStore, PublishReport,
    RelayMessage, StopHandle, StoredMessage, Subscription, kinds,
};

const RELAY_NAME: &str = "memory";

struct LiveSubscription {
    filter: Filter,
    tx: mpsc::UnboundedSender<RelayMessage>,
    stop: watch::Receiver<bool>,
}

impl LiveSubscription {
    fn is_open(&self) -> bool {
        !*self.stop.borrow() && !self.tx.is_closed()
    }
}

#[derive(Default)]
struct MemoryState {
    events: Vec<EventRecord>,
    live: Vec<LiveSubscription>,
    fetch_log: Vec<Filter>,
    subscribe_log: Vec<Filter>,
    count_log: Vec<Filter>,
    published: Vec<EventRecord>,
}

impl MemoryState {
    fn matching(&self, filter: &Filter) -> Vec<EventRecord> {
        let mut matches: Vec<EventRecord> = self
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matches.truncate(limit);
        }
        matches
    }
}

/// Tracks how many operations of one type are running at once.
struct InFlight<'a> {
    current: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { current }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An in-memory relay.
pub struct MemorySource {
    state: Mutex<MemoryState>,
    latency_ms: AtomicU64,
    count_supported: AtomicBool,
    offline: AtomicBool,
    reject_publishes: AtomicBool,
    withhold_eose: AtomicBool,
    fetch_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
    count_calls: AtomicUsize,
    fetches_in_flight: AtomicUsize,
    peak_fetches: AtomicUsize,
    counts_in_flight: AtomicUsize,
    peak_counts: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MemoryState::default()),
            latency_ms: AtomicU64::new(0),
            count_supported: AtomicBool::new(false),
            offline: AtomicBool::new(false),
            reject_publishes: AtomicBool::new(false),
            withhold_eose: AtomicBool::new(false),
            fetch_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
            count_calls: AtomicUsize::new(0),
            fetches_in_flight: AtomicUsize::new(0),
            peak_fetches: AtomicUsize::new(0),
            counts_in_flight: AtomicUsize::new(0),
            peak_counts: AtomicUsize::new(0),
        })
    }

    /// Seed stored events without notifying live subscriptions.
    pub fn with_events(self: Arc<Self>, events: impl IntoIterator<Item = EventRecord>) -> Arc<Self> {
        {
            let mut state = self.lock();
            for event in events {
                if !state.events.iter().any(|e| e.id == event.id) {
                    state.events.push(event);
                }
            }
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay applied to every fetch, count and history replay.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms.load(Ordering::SeqCst))
    }

    /// Advertise (or stop advertising) server-side counts.
    pub fn set_count_supported(&self, supported: bool) {
        self.count_supported.store(supported, Ordering::SeqCst);
    }

    /// Make fetch, subscribe and count fail with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_reject_publishes(&self, reject: bool) {
        self.reject_publishes.store(reject, Ordering::SeqCst);
    }

    /// Hold back end-of-stored-events on new subscriptions until
    /// [`release_end_of_stored_events`](Self::release_end_of_stored_events).
    pub fn set_withhold_eose(&self, withhold: bool) {
        self.withhold_eose.store(withhold, Ordering::SeqCst);
    }

    /// Send end-of-stored-events to every open subscription.
    pub fn release_end_of_stored_events(&self) {
        let state = self.lock();
        for sub in state.live.iter().filter(|s| s.is_open()) {
            let _ = sub.tx.send(RelayMessage::EndOfStoredEvents);
        }
    }

    /// Store `event` and push it to every open subscription it matches.
    ///
    /// Pushing happens even when the id is already stored, the way several
    /// relays re-deliver the same event.
    pub fn inject(&self, event: EventRecord) {
        let mut state = self.lock();
        if !state.events.iter().any(|e| e.id == event.id) {
            state.events.push(event.clone());
        }
        state.live.retain(LiveSubscription::is_open);
        for sub in state.live.iter().filter(|s| s.filter.matches(&event)) {
            let _ = sub.tx.send(RelayMessage::Event(event.clone()));
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    /// Highest number of fetches that were in flight at the same time.
    pub fn peak_concurrent_fetches(&self) -> usize {
        self.peak_fetches.load(Ordering::SeqCst)
    }

    /// Highest number of count requests that were in flight at the same time.
    pub fn peak_concurrent_counts(&self) -> usize {
        self.peak_counts.load(Ordering::SeqCst)
    }

    pub fn fetch_log(&self) -> Vec<Filter> {
        self.lock().fetch_log.clone()
    }

    pub fn subscribe_log(&self) -> Vec<Filter> {
        self.lock().subscribe_log.clone()
    }

    pub fn count_log(&self) -> Vec<Filter> {
        self.lock().count_log.clone()
    }

    pub fn published(&self) -> Vec<EventRecord> {
        self.lock().published.clone()
    }

    /// Subscriptions that have not been stopped or dropped.
    pub fn open_subscriptions(&self) -> usize {
        self.lock().live.iter().filter(|s| s.is_open()).count()
    }

    fn check_online(&self) -> Result<(), NostrError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(NostrError::Network("memory relay offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EventSource for MemorySource {
    async fn fetch(&self, filter: &Filter) -> Result<Vec<EventRecord>, NostrError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.lock().fetch_log.push(filter.clone());
        let _in_flight = InFlight::enter(&self.fetches_in_flight, &self.peak_fetches);

        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.check_online()?;

        let matches = self.lock().matching(filter);
        trace!(matches = matches.len(), "memory fetch");
        Ok(matches)
    }

    async fn subscribe(&self, filter: Filter) -> Result<Subscription, NostrError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = StopHandle::new();

        let history = {
            let mut state = self.lock();
            state.subscribe_log.push(filter.clone());
            let history = state.matching(&filter);
            state.live.push(LiveSubscription {
                filter,
                tx: tx.clone(),
                stop: stop_rx,
            });
            history
        };

        let latency = self.latency();
        let send_eose = !self.withhold_eose.load(Ordering::SeqCst);
        let replay = async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            for event in history {
                let _ = tx.send(RelayMessage::Event(event));
            }
            if send_eose {
                let _ = tx.send(RelayMessage::EndOfStoredEvents);
            }
        };
        if latency.is_zero() {
            replay.await;
        } else {
            tokio::spawn(replay);
        }

        Ok(Subscription::new(rx, stop))
    }

    async fn count(&self, filter: &Filter) -> Result<u64, NostrError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.lock().count_log.push(filter.clone());
        let _in_flight = InFlight::enter(&self.counts_in_flight, &self.peak_counts);

        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.check_online()?;
        if !self.count_supported.load(Ordering::SeqCst) {
            return Err(NostrError::Unsupported("count"));
        }

        let state = self.lock();
        Ok(state.events.iter().filter(|e| filter.matches(e)).count() as u64)
    }

    async fn publish(&self, event: &EventRecord) -> Result<PublishReport, NostrError> {
        self.lock().published.push(event.clone());
        if self.reject_publishes.load(Ordering::SeqCst) {
            return Ok(PublishReport {
                accepted: vec![],
                rejected: vec![(RELAY_NAME.to_string(), "blocked: test".to_string())],
            });
        }
        self.inject(event.clone());
        Ok(PublishReport {
            accepted: vec![RELAY_NAME.to_string()],
            rejected: vec![],
        })
    }
}

/// Profile events held in memory.
#[derive(Default)]
pub struct MemoryProfileStore {
    events: Mutex<Vec<EventRecord>>,
    loads: AtomicUsize,
}

impl MemoryProfileStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, event: EventRecord) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Number of `load_profiles` calls served.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load_profiles(&self, authors: &[String]) -> Result<Vec<EventRecord>, NostrError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(events
            .iter()
            .filter(|e| e.kind == kinds::METADATA && authors.contains(&e.author))
            .cloned()
            .collect())
    }
}

/// Direct messages held in memory.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: Mutex<HashMap<String, StoredMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn get(&self, id: &str) -> Result<Option<StoredMessage>, NostrError> {
        let messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(messages.get(id).cloned())
    }

    async fn put(&self, message: StoredMessage) -> Result<(), NostrError> {
        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        messages.insert(message.id.clone(), message);
        Ok(())
    }

    async fn by_peer(
        &self,
        peer: &str,
        since: Option<u64>,
        until: Option<u64>,
    ) -> Result<Vec<StoredMessage>, NostrError> {
        let messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<StoredMessage> = messages
            .values()
            .filter(|m| m.peer == peer)
            .filter(|m| since.is_none_or(|s| m.created_at >= s))
            .filter(|m| until.is_none_or(|u| m.created_at <= u))
            .cloned()
            .collect();
        found.sort_by_key(|m| m.created_at);
        Ok(found)
    }
}

//! Bounded, deduplicated, newest-first event sequence.

use std::collections::HashSet;
use std::sync::Arc;

use mynostrspace_nostr::EventRecord;

/// Events ordered by `created_at`, descending, unique by id.
///
/// Inserts binary-search their position. When the cap is exceeded the oldest
/// event is evicted.
#[derive(Debug, Clone)]
pub struct Timeline {
    events: Vec<Arc<EventRecord>>,
    ids: HashSet<String>,
    cap: usize,
}

impl Timeline {
    pub fn new(cap: usize) -> Self {
        Self {
            events: Vec::new(),
            ids: HashSet::new(),
            cap: cap.max(1),
        }
    }

    /// Insert `event` in sort position. Returns `true` if the timeline
    /// changed, `false` for duplicates and for events too old to retain.
    pub fn insert(&mut self, event: Arc<EventRecord>) -> bool {
        if self.ids.contains(&event.id) {
            return false;
        }
        let at = self
            .events
            .partition_point(|e| e.created_at >= event.created_at);
        if at >= self.cap {
            return false;
        }

        self.ids.insert(event.id.clone());
        self.events.insert(at, event);
        while self.events.len() > self.cap {
            if let Some(evicted) = self.events.pop() {
                self.ids.remove(&evicted.id);
            }
        }
        true
    }

    /// Insert every event; returns how many changed the timeline.
    pub fn extend<I>(&mut self, events: I) -> usize
    where
        I: IntoIterator<Item = Arc<EventRecord>>,
    {
        events.into_iter().filter(|e| self.insert(Arc::clone(e))).count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Drop every event for which `keep` returns `false`.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&EventRecord) -> bool,
    {
        let ids = &mut self.ids;
        self.events.retain(|e| {
            let kept = keep(e);
            if !kept {
                ids.remove(&e.id);
            }
            kept
        });
    }

    /// Remove and return every event, newest first.
    pub fn take(&mut self) -> Vec<Arc<EventRecord>> {
        self.ids.clear();
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Arc<EventRecord>] {
        &self.events
    }

    pub fn to_vec(&self) -> Vec<Arc<EventRecord>> {
        self.events.clone()
    }

    pub fn newest_created_at(&self) -> Option<u64> {
        self.events.first().map(|e| e.created_at)
    }

    pub fn oldest_created_at(&self) -> Option<u64> {
        self.events.last().map(|e| e.created_at)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Whether nothing older than the current oldest event can be inserted.
    pub fn is_full(&self) -> bool {
        self.events.len() >= self.cap
    }
}

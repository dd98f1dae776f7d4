//! Interaction notifications for the viewer.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use mynostrspace_nostr::{EventRecord, EventSource, Filter, StopHandle, kinds, unix_now};

use crate::config::NotificationConfig;
use crate::error::ClientError;
use crate::stream::{FrameSink, Phase, pump};
use crate::timeline::Timeline;

/// Kinds that count as an interaction with the viewer.
pub const NOTIFICATION_KINDS: [u32; 4] = [
    kinds::TEXT_NOTE,
    kinds::REPOST,
    kinds::REACTION,
    kinds::ZAP_RECEIPT,
];

/// Immutable view of the notification list.
#[derive(Debug, Clone, Default)]
pub struct NotificationSnapshot {
    pub phase: Phase,
    pub items: Vec<Arc<EventRecord>>,
    pub unread: bool,
    pub last_seen: u64,
}

struct NotificationState {
    phase: Phase,
    items: Timeline,
    blocked: HashSet<String>,
    last_seen: u64,
}

impl NotificationState {
    fn unread(&self) -> bool {
        self.items
            .newest_created_at()
            .is_some_and(|newest| newest > self.last_seen)
    }

    fn snapshot(&self) -> NotificationSnapshot {
        NotificationSnapshot {
            phase: self.phase,
            items: self.items.to_vec(),
            unread: self.unread(),
            last_seen: self.last_seen,
        }
    }
}

struct NotificationInner {
    source: Arc<dyn EventSource>,
    viewer: String,
    config: NotificationConfig,
    state: Mutex<NotificationState>,
    snapshots: watch::Sender<NotificationSnapshot>,
    stop: StopHandle,
    stop_rx: watch::Receiver<bool>,
}

impl NotificationInner {
    fn lock(&self) -> MutexGuard<'_, NotificationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &NotificationState) {
        self.snapshots.send_replace(state.snapshot());
    }

    /// Relays may match `#p` loosely; require a literal tag, and drop the
    /// viewer's own events and blocked authors.
    fn accepts(&self, state: &NotificationState, event: &EventRecord) -> bool {
        NOTIFICATION_KINDS.contains(&event.kind)
            && event.author != self.viewer
            && !state.blocked.contains(&event.author)
            && event.tag_values("p").any(|p| p == self.viewer)
    }
}

impl FrameSink for NotificationInner {
    fn apply_frame(&self, events: Vec<EventRecord>) {
        let mut state = self.lock();
        if !matches!(state.phase, Phase::Loading | Phase::Live) {
            return;
        }
        let mut changed = false;
        for event in events {
            if !self.accepts(&state, &event) {
                trace!(event_id = %event.id, "notification filtered");
                continue;
            }
            changed |= state.items.insert(Arc::new(event));
        }
        if changed {
            self.publish(&state);
        }
    }

    fn end_of_stored_events(&self) {
        let mut state = self.lock();
        if state.phase == Phase::Loading {
            state.phase = Phase::Live;
            debug!(items = state.items.len(), "notification history complete");
            self.publish(&state);
        }
    }

    fn closed(&self) {
        let mut state = self.lock();
        if state.phase != Phase::Stopped {
            state.phase = Phase::Stopped;
            self.publish(&state);
        }
    }
}

/// Subscription controller for the viewer's notifications.
pub struct NotificationController {
    inner: Arc<NotificationInner>,
}

impl NotificationController {
    pub fn new(
        source: Arc<dyn EventSource>,
        viewer: impl Into<String>,
        blocked: impl IntoIterator<Item = String>,
        config: NotificationConfig,
    ) -> Self {
        let state = NotificationState {
            phase: Phase::Idle,
            items: Timeline::new(config.cap),
            blocked: blocked.into_iter().collect(),
            last_seen: 0,
        };
        let (snapshots, _) = watch::channel(state.snapshot());
        let (stop, stop_rx) = StopHandle::new();
        Self {
            inner: Arc::new(NotificationInner {
                source,
                viewer: viewer.into(),
                config,
                state: Mutex::new(state),
                snapshots,
                stop,
                stop_rx,
            }),
        }
    }

    /// Subscribe to interactions from the configured window up to now and
    /// onward.
    pub async fn start(&self) -> Result<(), ClientError> {
        {
            let mut state = self.inner.lock();
            if state.phase != Phase::Idle {
                return Err(ClientError::AlreadyStarted("notifications"));
            }
            state.phase = Phase::Loading;
            self.inner.publish(&state);
        }

        let since = unix_now().saturating_sub(self.inner.config.window_secs());
        let filter = Filter::new()
            .kinds(NOTIFICATION_KINDS)
            .participant_refs([self.inner.viewer.clone()])
            .since(since);

        let subscription = match self.inner.source.subscribe(filter).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(viewer = %self.inner.viewer, error = %e, "notification subscription failed");
                let mut state = self.inner.lock();
                if state.phase == Phase::Loading {
                    state.phase = Phase::Idle;
                    self.inner.publish(&state);
                }
                return Err(e.into());
            }
        };

        info!(viewer = %self.inner.viewer, since, "notifications started");
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
        self.inner.closed();
    }

    /// Set the watermark the unread flag compares against.
    pub fn set_last_seen(&self, last_seen: u64) {
        let mut state = self.inner.lock();
        if state.last_seen != last_seen {
            state.last_seen = last_seen;
            self.inner.publish(&state);
        }
    }

    /// Advance the watermark to the newest item.
    pub fn mark_all_read(&self) {
        let newest = self.inner.lock().items.newest_created_at();
        if let Some(newest) = newest {
            self.set_last_seen(newest);
        }
    }

    /// Hide `author` from now on, including items already listed.
    pub fn block(&self, author: &str) {
        let mut state = self.inner.lock();
        if !state.blocked.insert(author.to_string()) {
            return;
        }
        let before = state.items.len();
        state.items.retain(|e| e.author != author);
        if state.items.len() != before {
            self.inner.publish(&state);
        }
    }

    pub fn is_unread(&self) -> bool {
        self.inner.lock().unread()
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<NotificationSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.inner.stop.clone()
    }
}

impl Drop for NotificationController {
    fn drop(&mut self) {
        self.inner.stop.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mynostrspace_nostr::MemorySource;

    fn mention(id: &str, author: &str, p: &str, created_at: u64) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            author: author.to_string(),
            kind: kinds::REACTION,
            created_at,
            tags: vec![vec!["p".to_string(), p.to_string()]],
            content: "+".to_string(),
            sig: String::new(),
        }
    }

    fn live_controller(blocked: Vec<String>) -> NotificationController {
        let controller = NotificationController::new(
            MemorySource::new(),
            "me",
            blocked,
            NotificationConfig::default(),
        );
        controller.inner.lock().phase = Phase::Live;
        controller
    }

    #[test]
    fn test_guard_requires_literal_tag_and_excludes_self_and_blocked() {
        let controller = live_controller(vec!["troll".to_string()]);
        controller.inner.apply_frame(vec![
            mention("ok", "bob", "me", 10),
            mention("loose", "bob", "someone-else", 11),
            mention("own", "me", "me", 12),
            mention("blocked", "troll", "me", 13),
        ]);

        let ids: Vec<_> = controller
            .snapshot()
            .items
            .iter()
            .map(|e| e.id.clone())
            .collect();
        assert_eq!(ids, vec!["ok"]);
    }

    #[test]
    fn test_unread_tracks_watermark() {
        let controller = live_controller(vec![]);
        assert!(!controller.is_unread());

        controller.inner.apply_frame(vec![mention("a", "bob", "me", 100)]);
        assert!(controller.is_unread());

        controller.set_last_seen(100);
        assert!(!controller.is_unread());

        controller.inner.apply_frame(vec![mention("b", "bob", "me", 101)]);
        assert!(controller.is_unread());
        controller.mark_all_read();
        assert!(!controller.snapshot().unread);
    }

    #[test]
    fn test_block_removes_existing_items() {
        let controller = live_controller(vec![]);
        controller.inner.apply_frame(vec![
            mention("a", "bob", "me", 1),
            mention("b", "carol", "me", 2),
        ]);
        controller.block("bob");
        assert_eq!(controller.snapshot().items.len(), 1);
    }

    #[test]
    fn test_list_is_capped() {
        let controller = live_controller(vec![]);
        let events = (0..80)
            .map(|n| mention(&format!("n{n}"), "bob", "me", n))
            .collect();
        controller.inner.apply_frame(events);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.items.len(), 50);
        assert_eq!(snapshot.items[0].created_at, 79);
    }
}

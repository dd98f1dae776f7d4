//! Per-key observer registry.
//!
//! Each cache entry owns a `ListenerSet`. Subscribing returns a
//! `ListenerHandle`; dropping the handle or calling `unsubscribe` detaches the
//! listener, and doing so more than once is harmless.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Callback invoked with the new value on every change.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

/// Listeners registered for one cache key.
pub struct ListenerSet<T> {
    slots: Mutex<Slots<T>>,
}

impl<T: 'static> ListenerSet<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(Slots {
                next_id: 0,
                listeners: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `listener`. It stays registered until the handle is dropped
    /// or unsubscribed.
    pub fn add(self: &Arc<Self>, listener: Listener<T>) -> ListenerHandle
    where
        T: Send,
    {
        let id = {
            let mut slots = self.lock();
            let id = slots.next_id;
            slots.next_id += 1;
            slots.listeners.push((id, listener));
            id
        };
        let set: Arc<dyn Detach> = self.clone();
        ListenerHandle {
            set: Arc::downgrade(&set),
            id,
            detached: AtomicBool::new(false),
        }
    }

    /// Call every listener with `value`, synchronously.
    ///
    /// The listener list is snapshotted first, so listeners may subscribe or
    /// unsubscribe from inside the callback.
    pub fn notify(&self, value: &T) {
        let listeners: Vec<Listener<T>> = self
            .lock()
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T: Send + 'static> Detach for ListenerSet<T> {
    fn detach(&self, id: u64) {
        self.lock().listeners.retain(|(slot, _)| *slot != id);
    }
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct ListenerHandle {
    set: Weak<dyn Detach>,
    id: u64,
    detached: AtomicBool,
}

impl ListenerHandle {
    /// Detach the listener. Idempotent.
    pub fn unsubscribe(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(set) = self.set.upgrade() {
            set.detach(self.id);
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("detached", &self.detached.load(Ordering::SeqCst))
            .finish()
    }
}

//! The relay-facing event source.
//!
//! `EventSource` is the only path to the network. Everything above it (caches,
//! controllers) consumes events through these four operations.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::{EventRecord, Filter, NostrError};

/// A message on a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// A matching event, historical or live.
    Event(EventRecord),
    /// Stored history is exhausted; further events are live.
    EndOfStoredEvents,
}

/// Stops a subscription. Cloneable and idempotent.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Create a handle and the receiver the producing side watches.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Signal stop. Safe to call any number of times.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// A receiver that observes the stop signal.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// A long-lived subscription: historical matches, an end-of-stored-events
/// marker, then live matches.
///
/// Dropping the subscription stops it.
#[derive(Debug)]
pub struct Subscription {
    messages: mpsc::UnboundedReceiver<RelayMessage>,
    stop: StopHandle,
}

impl Subscription {
    pub fn new(messages: mpsc::UnboundedReceiver<RelayMessage>, stop: StopHandle) -> Self {
        Self { messages, stop }
    }

    /// Next message, or `None` once the producer has gone away.
    pub async fn recv(&mut self) -> Option<RelayMessage> {
        self.messages.recv().await
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// Per-relay outcome of a publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Relays that accepted the event.
    pub accepted: Vec<String>,
    /// Relays that rejected it, with their reason.
    pub rejected: Vec<(String, String)>,
}

impl PublishReport {
    /// Whether at least one relay accepted the event.
    pub fn is_delivered(&self) -> bool {
        !self.accepted.is_empty()
    }

    /// Turn an undelivered report into an error.
    pub fn ensure_delivered(self) -> Result<Self, NostrError> {
        if self.is_delivered() {
            Ok(self)
        } else {
            Err(NostrError::Publish {
                failed: self.rejected.len(),
                total: self.rejected.len(),
            })
        }
    }
}

/// Fetch, subscribe, count and publish against a relay set.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// One-shot fetch of stored events matching `filter`.
    async fn fetch(&self, filter: &Filter) -> Result<Vec<EventRecord>, NostrError>;

    /// Open a live subscription.
    async fn subscribe(&self, filter: Filter) -> Result<Subscription, NostrError>;

    /// Server-side count (NIP-45) where the relays advertise it.
    async fn count(&self, _filter: &Filter) -> Result<u64, NostrError> {
        Err(NostrError::Unsupported("count"))
    }

    /// Publish a signed event to every destination relay.
    async fn publish(&self, event: &EventRecord) -> Result<PublishReport, NostrError>;
}

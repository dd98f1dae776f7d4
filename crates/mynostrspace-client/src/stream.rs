//! Frame-batched delivery of relay subscriptions.
//!
//! A controller's subscription is drained by a pump task. Arriving events are
//! buffered and handed to the controller once per frame interval, so a burst
//! of N events produces one merge instead of N. End-of-stored-events flushes
//! the buffer first, so everything that arrived before it is applied as
//! history.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

use mynostrspace_nostr::{EventRecord, RelayMessage, Subscription};

/// Lifecycle of a subscription controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    /// Constructed, not started.
    #[default]
    Idle,
    /// Receiving stored history.
    Loading,
    /// History complete; arrivals are new.
    Live,
    /// Torn down. Terminal.
    Stopped,
}

/// Consumer of batched relay traffic.
pub(crate) trait FrameSink: Send + Sync + 'static {
    /// Apply one frame's worth of events.
    fn apply_frame(&self, events: Vec<EventRecord>);

    /// Stored history is complete.
    fn end_of_stored_events(&self);

    /// The pump has exited and will deliver nothing more.
    fn closed(&self) {}
}

/// Drain `subscription` into `sink` until it ends or `stop` is signalled.
pub(crate) async fn pump<S: FrameSink>(
    sink: Arc<S>,
    mut subscription: Subscription,
    mut stop: watch::Receiver<bool>,
    frame: Duration,
) {
    let mut buffer: Vec<EventRecord> = Vec::new();
    let mut deadline: Option<Instant> = None;

    if *stop.borrow() {
        subscription.stop();
        sink.closed();
        return;
    }

    loop {
        tokio::select! {
            biased;

            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    debug!(buffered = buffer.len(), "stream stopped");
                    break;
                }
            }

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                flush(sink.as_ref(), &mut buffer);
            }

            message = subscription.recv() => match message {
                Some(RelayMessage::Event(event)) => {
                    buffer.push(event);
                    deadline.get_or_insert_with(|| Instant::now() + frame);
                }
                Some(RelayMessage::EndOfStoredEvents) => {
                    deadline = None;
                    flush(sink.as_ref(), &mut buffer);
                    sink.end_of_stored_events();
                }
                None => {
                    flush(sink.as_ref(), &mut buffer);
                    debug!("stream closed by source");
                    break;
                }
            },
        }
    }

    subscription.stop();
    sink.closed();
}

/// Exclusive claim on a controller's page-request slot. Released on drop,
/// including when the request future is cancelled.
pub(crate) struct PageGuard<'a>(&'a AtomicBool);

impl<'a> PageGuard<'a> {
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::SeqCst)).then_some(Self(flag))
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn flush<S: FrameSink>(sink: &S, buffer: &mut Vec<EventRecord>) {
    if buffer.is_empty() {
        return;
    }
    let events = std::mem::take(buffer);
    trace!(events = events.len(), "flushing frame");
    sink.apply_frame(events);
}

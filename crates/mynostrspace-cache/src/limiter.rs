//! FIFO concurrency limiter.
//!
//! Wraps a tokio semaphore (which admits waiters in FIFO order) and records
//! in-flight and peak counts for observability.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::{trace, warn};

/// Bounds how many operations of one kind run at once.
#[derive(Debug)]
pub struct Limiter {
    name: &'static str,
    limit: usize,
    semaphore: Semaphore,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Limiter {
    /// Create a limiter admitting at most `limit` concurrent operations.
    ///
    /// A limit of zero is raised to one.
    pub fn new(name: &'static str, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            name,
            limit,
            semaphore: Semaphore::new(limit),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Run `operation` once a slot is free. Waiters are admitted in the order
    /// they arrived.
    pub async fn run<F: Future>(&self, operation: F) -> F::Output {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                // Only reachable if the semaphore was closed, which never happens.
                warn!(limiter = self.name, error = %e, "limiter closed, running unthrottled");
                None
            }
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        trace!(limiter = self.name, in_flight = now, "slot acquired");

        let _slot = Slot(&self.in_flight);
        operation.await
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of operations that ran at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct Slot<'a>(&'a AtomicUsize);

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time dispatcher counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Fragments handed to the invoker (first sends only).
    pub dispatched: u64,
    /// Re-sends of an unchanged fragment.
    pub resent: u64,
    /// Fragments cut in two for a retry.
    pub split: u64,
    /// Results handed to receivers.
    pub delivered: u64,
    /// Results delivered with failures after every retry option was used.
    pub gave_up: u64,
    /// Invocations that produced no result at all.
    pub invocation_failures: u64,
    /// Fragments dropped with their cycle, never retried nor blacklisted.
    pub abandoned: u64,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub dispatched: AtomicU64,
    pub resent: AtomicU64,
    pub split: AtomicU64,
    pub delivered: AtomicU64,
    pub gave_up: AtomicU64,
    pub invocation_failures: AtomicU64,
    pub abandoned: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, in_flight: usize) -> DispatcherStats {
        DispatcherStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            resent: self.resent.load(Ordering::Relaxed),
            split: self.split.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            gave_up: self.gave_up.load(Ordering::Relaxed),
            invocation_failures: self.invocation_failures.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            in_flight,
        }
    }
}

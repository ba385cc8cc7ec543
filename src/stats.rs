//! In-process activity counters for a runner.
//!
//! Tracks dispatch and outcome volumes for one connection:
//! - Jobs dispatched and attempts started
//! - Terminal successes and failures
//! - How failures were disposed (released back vs dropped)
//!
//! All counters use atomic operations for lock-free, zero-allocation tracking.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter block owned by one runner. Thread-safe and non-blocking.
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Jobs accepted by dispatch since the runner opened
    dispatched: AtomicU64,
    /// Individual attempts started (a job with retries counts once per try)
    attempts: AtomicU64,
    /// Jobs that reached a successful terminal state
    succeeded: AtomicU64,
    /// Jobs that reached a failed terminal state
    failed: AtomicU64,
    /// Failed jobs whose hook asked for a release back to the queue
    released: AtomicU64,
    /// Failed jobs removed permanently
    dropped: AtomicU64,
}

impl QueueStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn record_released(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::SeqCst),
            attempts: self.attempts.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of a runner's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub dispatched: u64,
    pub attempts: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub released: u64,
    pub dropped: u64,
}

impl StatsSnapshot {
    /// Jobs that finished one way or the other.
    pub fn finished(&self) -> u64 {
        self.succeeded.saturating_add(self.failed)
    }
}

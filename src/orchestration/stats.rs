//! Runtime counters for a stage loop

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct StageStats {
    /// Poll calls, successful or not
    pub polls: AtomicU64,
    pub poll_errors: AtomicU64,
    pub messages_received: AtomicU64,
    /// Jobs dispatched successfully and acked
    pub completed: AtomicU64,
    /// Jobs left un-acked by the ordering gate
    pub deferred: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub poison_discarded: AtomicU64,
    /// Deletes that failed on the success or poison path
    pub ack_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageStatsSnapshot {
    pub polls: u64,
    pub poll_errors: u64,
    pub messages_received: u64,
    pub completed: u64,
    pub deferred: u64,
    pub dead_lettered: u64,
    pub poison_discarded: u64,
    pub ack_failures: u64,
}

impl StageStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StageStatsSnapshot {
        StageStatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            poison_discarded: self.poison_discarded.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
        }
    }
}

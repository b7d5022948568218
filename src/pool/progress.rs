use crate::lock_or_recover;
use crate::session::CallOutcome;
use serde::Serialize;
use std::sync::Mutex;

/// Point-in-time view of a pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub checked: usize,
    pub total: usize,
    pub active: usize,
    pub no_subscriber: usize,
    pub invalid_number: usize,
}

impl ProgressSnapshot {
    pub fn is_complete(&self) -> bool {
        self.checked >= self.total
    }
}

/// Shared counters, updated by the pool monitor as results arrive.
#[derive(Debug, Default)]
pub struct Progress {
    inner: Mutex<ProgressSnapshot>,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            inner: Mutex::new(ProgressSnapshot {
                total,
                ..ProgressSnapshot::default()
            }),
        }
    }

    pub fn record(&self, outcome: CallOutcome) -> ProgressSnapshot {
        let mut progress = lock_or_recover(&self.inner, "pool progress");
        progress.checked += 1;
        match outcome {
            CallOutcome::Active => progress.active += 1,
            CallOutcome::NoSubscriber => progress.no_subscriber += 1,
            CallOutcome::InvalidNumber => progress.invalid_number += 1,
        }
        *progress
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *lock_or_recover(&self.inner, "pool progress")
    }
}

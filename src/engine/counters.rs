use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Run-wide thread telemetry read by throughput pacing and reporting.
#[derive(Debug, Default)]
pub struct ThreadCounters {
    active: AtomicU64,
    sampling: AtomicU64,
    started: AtomicU64,
}

impl ThreadCounters {
    /// Virtual users currently running.
    #[must_use]
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    /// Running virtual users that have completed at least one sample.
    #[must_use]
    pub fn sampling(&self) -> u64 {
        self.sampling.load(Ordering::Acquire)
    }

    /// Virtual users started since the last reset.
    #[must_use]
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn reset(&self) {
        self.active.store(0, Ordering::Release);
        self.sampling.store(0, Ordering::Release);
        self.started.store(0, Ordering::Release);
    }
}

/// Keeps a virtual user counted as active; the count is released exactly
/// once when the guard drops, whatever path the user exits through.
#[derive(Debug)]
pub(crate) struct ThreadGuard {
    counters: Arc<ThreadCounters>,
    sampling: bool,
}

impl ThreadGuard {
    pub(crate) fn enter(counters: Arc<ThreadCounters>) -> Self {
        counters.active.fetch_add(1, Ordering::AcqRel);
        counters.started.fetch_add(1, Ordering::AcqRel);
        Self {
            counters,
            sampling: false,
        }
    }

    pub(crate) fn mark_sampling(&mut self) {
        if !self.sampling {
            self.sampling = true;
            self.counters.sampling.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        decrement(&self.counters.active);
        if self.sampling {
            decrement(&self.counters.sampling);
        }
    }
}

fn decrement(counter: &AtomicU64) {
    loop {
        let current = counter.load(Ordering::Acquire);
        let Some(next) = current.checked_sub(1) else {
            break;
        };
        if counter
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            break;
        }
    }
}

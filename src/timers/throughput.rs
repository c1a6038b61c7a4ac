use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::engine::ThreadCounters;
use crate::plan::ThroughputMode;

const MILLIS_PER_MINUTE: f64 = 60_000.0;

/// Constant-throughput pacing for one virtual user.
#[derive(Debug, Clone)]
pub struct ThroughputTimer {
    throughput: f64,
    mode: ThroughputMode,
    next_scheduled: Option<Instant>,
}

impl ThroughputTimer {
    /// `throughput` is in samples per minute and must already be validated
    /// as finite and positive.
    #[must_use]
    pub const fn new(throughput: f64, mode: ThroughputMode) -> Self {
        Self {
            throughput,
            mode,
            next_scheduled: None,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> ThroughputMode {
        self.mode
    }

    /// Time between two samples for this timer, recomputed on every call.
    /// Group-scoped modes expect the counters of the caller's thread group.
    #[must_use]
    pub fn spacing(&self, counters: &ThreadCounters) -> Duration {
        let threads = match self.mode {
            ThroughputMode::ThisThreadOnly
            | ThroughputMode::AllActiveThreadsShared
            | ThroughputMode::AllActiveThreadsInGroupShared => 1,
            ThroughputMode::AllActiveThreads | ThroughputMode::AllActiveThreadsInGroup => {
                counters.active()
            }
            ThroughputMode::AllActiveThreadsOnceStarted => counters.sampling(),
        };
        spacing_for(self.throughput, threads.max(1))
    }

    pub fn delay(&mut self, counters: &ThreadCounters) -> Duration {
        self.delay_at(Instant::now(), counters)
    }

    /// The first call schedules the sample for `now`. Every later call
    /// advances the schedule by the current spacing; when the virtual user
    /// is already behind, the schedule catches up to `now` and no delay is
    /// returned.
    pub fn delay_at(&mut self, now: Instant, counters: &ThreadCounters) -> Duration {
        let spacing = self.spacing(counters);
        let target = self
            .next_scheduled
            .map_or(now, |previous| previous.checked_add(spacing).unwrap_or(previous));
        if target <= now {
            self.next_scheduled = Some(now);
            return Duration::ZERO;
        }
        self.next_scheduled = Some(target);
        target.saturating_duration_since(now)
    }

    #[must_use]
    pub const fn next_scheduled(&self) -> Option<Instant> {
        self.next_scheduled
    }
}

#[expect(
    clippy::float_arithmetic,
    reason = "Throughput is a float rate in samples per minute."
)]
pub(crate) fn spacing_for(throughput: f64, threads: u64) -> Duration {
    let threads = threads as f64;
    let millis = MILLIS_PER_MINUTE * threads / throughput;
    Duration::try_from_secs_f64(millis / 1_000.0).unwrap_or(Duration::MAX)
}

/// Which callers draw from one shared schedule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScheduleScope {
    /// Every shared-mode timer of every thread group.
    Run,
    /// Every group-shared timer inside the named thread group.
    Group(String),
}

/// Schedules for throughput timers in the shared modes. One schedule spans
/// the whole run; each thread group gets its own for the group-shared mode.
#[derive(Debug, Default)]
pub struct SharedSchedules {
    last_scheduled: Mutex<HashMap<ScheduleScope, Instant>>,
}

impl SharedSchedules {
    #[must_use]
    pub fn delay_at(&self, scope: &ScheduleScope, throughput: f64, now: Instant) -> Duration {
        let spacing = spacing_for(throughput, 1);
        let mut schedules = self
            .last_scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let next = schedules
            .get(scope)
            .map_or(now, |last| last.checked_add(spacing).unwrap_or(*last).max(now));
        schedules.insert(scope.clone(), next);
        let delay = next.saturating_duration_since(now);
        trace!("Shared schedule {:?} next in {:?}", scope, delay);
        delay
    }

    pub(crate) fn reset(&self) {
        self.last_scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

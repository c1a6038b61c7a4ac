//! Engine: spawns the virtual users of every thread group, owns the
//! run-scoped shared state and folds their samples into a summary.
mod builtins;
mod capability;
mod counters;
mod results;
mod user;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, ValidationError};
use crate::plan::{SchedulerSpec, TestPlan, validate_plan};
use crate::shutdown::{StopMode, StopReceiver, StopSender, request_stop, stop_channel};
use crate::sync::{BarrierRegistry, LockRegistry};
use crate::timers::SharedSchedules;

pub use builtins::{
    Capture, DebugSampler, HttpSampler, LogListener, SetVariable, SummaryListener,
};
pub use capability::{
    Capabilities, ComponentRef, Listener, Processor, SampleContext, Sampler, ThreadInfo, Variables,
};
pub use counters::ThreadCounters;
pub(crate) use counters::ThreadGuard;
pub use results::{RunSummary, SampleRecord, SampleResult};
pub use user::ExitReason;

use user::{UserSetup, VirtualUser, Window};

const DEFAULT_RESULT_BUFFER: usize = 1_024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    /// Scales statistical timer delays; throughput and sync timers ignore it.
    pub timer_factor: f64,
    /// Capacity of the channel between virtual users and the collector.
    pub result_buffer: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timer_factor: 1.0,
            result_buffer: DEFAULT_RESULT_BUFFER,
        }
    }
}

/// State shared by every virtual user of one engine.
#[derive(Debug)]
pub struct RunContext {
    pub(crate) counters: Arc<ThreadCounters>,
    group_counters: Mutex<HashMap<String, Arc<ThreadCounters>>>,
    pub(crate) locks: LockRegistry,
    pub(crate) barriers: BarrierRegistry,
    pub(crate) schedules: SharedSchedules,
    pub(crate) stop: StopSender,
}

impl RunContext {
    fn new(stop: StopSender) -> Self {
        Self {
            counters: Arc::new(ThreadCounters::default()),
            group_counters: Mutex::new(HashMap::new()),
            locks: LockRegistry::default(),
            barriers: BarrierRegistry::default(),
            schedules: SharedSchedules::default(),
            stop,
        }
    }

    #[must_use]
    pub fn counters(&self) -> &ThreadCounters {
        &self.counters
    }

    /// Counters of one thread group, created on first use.
    #[must_use]
    pub fn group_counters(&self, group: &str) -> Arc<ThreadCounters> {
        let mut groups = self
            .group_counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(groups.entry(group.to_owned()).or_default())
    }

    #[must_use]
    pub const fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    #[must_use]
    pub const fn barriers(&self) -> &BarrierRegistry {
        &self.barriers
    }

    fn reset_for_run(&self) {
        self.counters.reset();
        self.group_counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.schedules.reset();
    }

    /// Test-end reset: later runs see fresh locks and barriers.
    fn reset_for_test_end(&self) {
        self.locks.reset();
        self.barriers.reset();
    }
}

/// Cloneable handle for stopping a running engine from another task.
#[derive(Debug, Clone)]
pub struct StopHandle {
    context: Arc<RunContext>,
}

impl StopHandle {
    pub fn stop(&self, mode: StopMode) {
        request_stop(&self.context.stop, mode);
    }

    #[must_use]
    pub fn mode(&self) -> StopMode {
        *self.context.stop.borrow()
    }
}

/// Runs one validated test plan. A stopped engine stays stopped; build a
/// new one for the next run.
#[derive(Debug)]
pub struct Engine {
    plan: Arc<TestPlan>,
    caps: Arc<Capabilities>,
    options: EngineOptions,
    context: Arc<RunContext>,
    stop_rx: StopReceiver,
}

impl Engine {
    /// Validates the plan against its own structure and the capability
    /// registry before anything runs.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid plan, an unknown capability kind or
    /// an invalid timer factor.
    pub fn new(plan: TestPlan, caps: Arc<Capabilities>, options: EngineOptions) -> AppResult<Self> {
        if !options.timer_factor.is_finite() || options.timer_factor < 0.0 {
            return Err(AppError::validation(ValidationError::InvalidTimerFactor {
                value: options.timer_factor,
            }));
        }
        validate_plan(&plan)?;
        caps.check_plan(&plan)?;
        let (stop_tx, stop_rx) = stop_channel();
        Ok(Self {
            plan: Arc::new(plan),
            caps,
            options,
            context: Arc::new(RunContext::new(stop_tx)),
            stop_rx,
        })
    }

    #[must_use]
    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            context: Arc::clone(&self.context),
        }
    }

    #[must_use]
    pub fn context(&self) -> Arc<RunContext> {
        Arc::clone(&self.context)
    }

    /// Runs every thread group to completion and returns the summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the result collector fails.
    pub async fn run(&self) -> AppResult<RunSummary> {
        self.context.reset_for_run();
        let (results_tx, results_rx) = mpsc::channel(self.options.result_buffer.max(1));
        let collector = tokio::spawn(results::collect(results_rx));

        let now = Instant::now();
        let wall_now = Utc::now();
        let mut users = JoinSet::new();
        info!("Starting plan '{}'", self.plan.name);
        for group in &self.plan.groups {
            let group = Arc::new(group.clone());
            let window = resolve_window(group.scheduler.as_ref(), now, wall_now);
            debug!(
                "Group '{}': {} threads, ramp-up {}ms",
                group.name, group.threads, group.ramp_up_ms
            );
            for thread in 0..group.threads {
                let offset = ramp_offset(group.ramp_up_ms, thread, group.threads);
                let user = VirtualUser::new(UserSetup {
                    group: Arc::clone(&group),
                    thread,
                    window: Window {
                        start: window.start.checked_add(offset).unwrap_or(window.start),
                        end: window.end,
                    },
                    context: Arc::clone(&self.context),
                    caps: Arc::clone(&self.caps),
                    results: results_tx.clone(),
                    stop: self.stop_rx.clone(),
                    timer_factor: self.options.timer_factor,
                });
                users.spawn(user.run());
            }
        }
        drop(results_tx);

        let mut exits = std::collections::BTreeMap::new();
        while let Some(joined) = users.join_next().await {
            match joined {
                Ok(reason) => {
                    let count = exits.entry(reason).or_insert(0_u64);
                    *count = count.saturating_add(1);
                }
                Err(err) => warn!("Virtual user task failed: {}", err),
            }
        }

        let mut summary = collector.await??;
        summary.threads_started = self.context.counters.started();
        summary.exits = exits;
        self.context.reset_for_test_end();
        info!(
            "Plan '{}' finished: {} samples, {} errors",
            self.plan.name, summary.samples, summary.errors
        );
        Ok(summary)
    }
}

fn ramp_offset(ramp_up_ms: u64, thread: u32, threads: u32) -> Duration {
    if threads == 0 {
        return Duration::ZERO;
    }
    let millis = u128::from(ramp_up_ms)
        .saturating_mul(u128::from(thread))
        .checked_div(u128::from(threads))
        .unwrap_or(0);
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

/// Maps a scheduler onto the monotonic clock. Absolute times in the past
/// resolve to `now`.
pub(crate) fn resolve_window(
    scheduler: Option<&SchedulerSpec>,
    now: Instant,
    wall_now: DateTime<Utc>,
) -> Window {
    let Some(scheduler) = scheduler else {
        return Window { start: now, end: None };
    };
    let until = |at: DateTime<Utc>| {
        let ahead = at
            .signed_duration_since(wall_now)
            .to_std()
            .unwrap_or(Duration::ZERO);
        now.checked_add(ahead).unwrap_or(now)
    };
    let start = match (scheduler.start_at, scheduler.start_delay_ms) {
        (Some(at), _) => until(at),
        (None, Some(delay_ms)) => now
            .checked_add(Duration::from_millis(delay_ms))
            .unwrap_or(now),
        (None, None) => now,
    };
    let end = match (scheduler.end_at, scheduler.duration_ms) {
        (Some(at), _) => Some(until(at)),
        (None, Some(duration_ms)) => start.checked_add(Duration::from_millis(duration_ms)),
        (None, None) => None,
    };
    Window { start, end }
}

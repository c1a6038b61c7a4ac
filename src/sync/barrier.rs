use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::PlanError;
use crate::pacing;
use crate::shutdown::StopReceiver;

/// Validated sync timer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierConfig {
    group_size: u32,
    timeout: Option<Duration>,
}

impl BarrierConfig {
    /// # Errors
    ///
    /// Returns an error naming the barrier when the group size is zero or
    /// the timeout is present but not positive.
    pub fn new(name: &str, group_size: u32, timeout_ms: Option<i64>) -> Result<Self, PlanError> {
        if group_size == 0 {
            return Err(PlanError::BarrierGroupSizeZero {
                barrier: name.to_owned(),
            });
        }
        let timeout = match timeout_ms {
            None => None,
            Some(ms) => match u64::try_from(ms) {
                Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
                Ok(_) | Err(_) => {
                    return Err(PlanError::BarrierTimeoutNotPositive {
                        barrier: name.to_owned(),
                        timeout_ms: ms,
                    });
                }
            },
        };
        Ok(Self {
            group_size,
            timeout,
        })
    }

    #[must_use]
    pub const fn group_size(&self) -> u32 {
        self.group_size
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// How one `arrive` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArriveOutcome {
    /// The full group arrived.
    Released,
    /// The timeout elapsed before the group filled up.
    TimedOut,
    /// A stop was requested while waiting; the arrival was withdrawn.
    Cancelled,
    /// The caller's scheduled end passed while waiting; the arrival was
    /// withdrawn.
    EndReached,
}

#[derive(Debug)]
struct BarrierState {
    generation: u64,
    waiting: u32,
}

#[derive(Debug, Clone, Copy)]
struct Release {
    completed: u64,
    timed_out: bool,
}

/// Rendezvous point for a fixed-size group of virtual users. The count
/// re-arms after every release.
#[derive(Debug)]
pub struct Barrier {
    name: String,
    config: BarrierConfig,
    state: Mutex<BarrierState>,
    released: watch::Sender<Release>,
}

impl Barrier {
    #[must_use]
    pub fn new(name: &str, config: BarrierConfig) -> Self {
        let (released, _) = watch::channel(Release {
            completed: 0,
            timed_out: false,
        });
        Self {
            name: name.to_owned(),
            config,
            state: Mutex::new(BarrierState {
                generation: 0,
                waiting: 0,
            }),
            released,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn config(&self) -> BarrierConfig {
        self.config
    }

    /// Users currently blocked in the open generation.
    #[must_use]
    pub fn waiting(&self) -> u32 {
        self.lock_state().waiting
    }

    /// Blocks until the group fills up, the timeout elapses, `end` passes
    /// or a stop is requested. Dropping the future mid-wait withdraws the
    /// arrival.
    pub async fn arrive(&self, stop: &mut StopReceiver, end: Option<Instant>) -> ArriveOutcome {
        let mut released = self.released.subscribe();
        let mut arrival = {
            let mut state = self.lock_state();
            state.waiting = state.waiting.saturating_add(1);
            if state.waiting >= self.config.group_size {
                self.release(&mut state, false);
                return ArriveOutcome::Released;
            }
            Arrival {
                barrier: self,
                generation: state.generation,
                settled: false,
            }
        };
        let generation = arrival.generation;
        let timeout = self.config.timeout;

        tokio::select! {
            result = released.wait_for(|release| release.completed > generation) => {
                arrival.settled = true;
                match result {
                    Ok(release) if release.timed_out => ArriveOutcome::TimedOut,
                    Ok(_) => ArriveOutcome::Released,
                    Err(_) => ArriveOutcome::Cancelled,
                }
            }
            () = sleep_or_forever(timeout) => {
                arrival.settled = true;
                let mut state = self.lock_state();
                if state.generation == generation {
                    debug!(
                        "Sync timer '{}' timed out with {}/{} waiting",
                        self.name, state.waiting, self.config.group_size
                    );
                    self.release(&mut state, true);
                    ArriveOutcome::TimedOut
                } else {
                    self.last_outcome()
                }
            }
            () = pacing::end_reached(end) => {
                if arrival.withdraw() {
                    ArriveOutcome::EndReached
                } else {
                    self.last_outcome()
                }
            }
            _ = stop.stopped() => {
                if arrival.withdraw() {
                    ArriveOutcome::Cancelled
                } else {
                    self.last_outcome()
                }
            }
        }
    }

    fn release(&self, state: &mut MutexGuard<'_, BarrierState>, timed_out: bool) {
        state.generation = state.generation.saturating_add(1);
        state.waiting = 0;
        self.released.send_replace(Release {
            completed: state.generation,
            timed_out,
        });
    }

    fn last_outcome(&self) -> ArriveOutcome {
        if self.released.borrow().timed_out {
            ArriveOutcome::TimedOut
        } else {
            ArriveOutcome::Released
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Arrival<'barrier> {
    barrier: &'barrier Barrier,
    generation: u64,
    settled: bool,
}

impl Arrival<'_> {
    /// Takes the arrival back out of the count if its generation is still
    /// open. Returns false when the generation was released first.
    fn withdraw(&mut self) -> bool {
        self.settled = true;
        let mut state = self.barrier.lock_state();
        if state.generation != self.generation {
            return false;
        }
        state.waiting = state.waiting.saturating_sub(1);
        true
    }
}

impl Drop for Arrival<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.withdraw();
        }
    }
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending::<()>().await,
    }
}

/// Process-wide map from sync timer name to barrier.
#[derive(Debug, Default)]
pub struct BarrierRegistry {
    barriers: Mutex<HashMap<String, Arc<Barrier>>>,
}

impl BarrierRegistry {
    /// Returns the barrier for `name`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error when `name` is already registered with a different
    /// group size or timeout; the registry is left unchanged.
    pub fn get_or_create(
        &self,
        name: &str,
        config: BarrierConfig,
    ) -> Result<Arc<Barrier>, PlanError> {
        let mut barriers = self
            .barriers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = barriers.get(name) {
            if existing.config != config {
                return Err(PlanError::BarrierMismatch {
                    barrier: name.to_owned(),
                });
            }
            return Ok(Arc::clone(existing));
        }
        let barrier = Arc::new(Barrier::new(name, config));
        barriers.insert(name.to_owned(), Arc::clone(&barrier));
        Ok(barrier)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.barriers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.barriers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::plan::NodeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticalTimer {
    Constant { delay: Duration },
    Uniform { delay: Duration, range: Duration },
    Gaussian { delay: Duration, deviation: Duration },
}

impl StatisticalTimer {
    /// Builds the timer for a timer node; `None` for every other kind.
    #[must_use]
    pub fn from_kind(kind: &NodeKind) -> Option<Self> {
        match kind {
            NodeKind::ConstantTimer { delay_ms } => Some(Self::Constant {
                delay: Duration::from_millis(*delay_ms),
            }),
            NodeKind::UniformRandomTimer { delay_ms, range_ms } => Some(Self::Uniform {
                delay: Duration::from_millis(*delay_ms),
                range: Duration::from_millis(*range_ms),
            }),
            NodeKind::GaussianRandomTimer {
                delay_ms,
                deviation_ms,
            } => Some(Self::Gaussian {
                delay: Duration::from_millis(*delay_ms),
                deviation: Duration::from_millis(*deviation_ms),
            }),
            NodeKind::SimpleController
            | NodeKind::LoopController { .. }
            | NodeKind::OnceOnlyController
            | NodeKind::InterleaveController
            | NodeKind::TransactionController
            | NodeKind::CriticalSection { .. }
            | NodeKind::Sampler { .. }
            | NodeKind::ConstantThroughputTimer { .. }
            | NodeKind::SyncTimer { .. }
            | NodeKind::PreProcessor { .. }
            | NodeKind::PostProcessor { .. }
            | NodeKind::Listener { .. } => None,
        }
    }

    pub fn delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match *self {
            Self::Constant { delay } => delay,
            Self::Uniform { delay, range } => {
                let range_ms = u64::try_from(range.as_millis()).unwrap_or(u64::MAX);
                if range_ms == 0 {
                    return delay;
                }
                delay.saturating_add(Duration::from_millis(rng.gen_range(0..range_ms)))
            }
            Self::Gaussian { delay, deviation } => {
                let Ok(normal) = Normal::new(delay.as_secs_f64(), deviation.as_secs_f64()) else {
                    return delay;
                };
                let secs: f64 = normal.sample(rng);
                // Negative draws floor at zero.
                Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::ZERO)
            }
        }
    }

    /// Applies a run-wide scaling factor to a computed delay.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "The timer factor is a float multiplier."
    )]
    pub fn scale(delay: Duration, factor: f64) -> Duration {
        if (factor - 1.0).abs() < f64::EPSILON {
            return delay;
        }
        Duration::try_from_secs_f64(delay.as_secs_f64() * factor.max(0.0)).unwrap_or(delay)
    }
}

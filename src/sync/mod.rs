//! Cross-user coordination: named critical-section locks and rendezvous
//! barriers, both keyed by user-supplied names and scoped to one run.
mod barrier;
mod lock;


pub use barrier::{ArriveOutcome, Barrier, BarrierConfig, BarrierRegistry};
pub use lock::{LockRegistry, NamedLockGuard};

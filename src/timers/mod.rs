//! Delay computation before each sample.
//!
//! Statistical timers only promise a non-negative delay. The constant
//! throughput timer keeps a next-scheduled time so that arrivals stay
//! periodic and an overrun is absorbed instead of accumulating drift.
mod statistical;
mod throughput;


pub use statistical::StatisticalTimer;
pub use throughput::{ScheduleScope, SharedSchedules, ThroughputTimer};

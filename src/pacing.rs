//! End-time aware pacing used by every timer before a virtual user sleeps.
//!
//! The adjustment is a pure function of its inputs, so any number of virtual
//! users can call it concurrently without coordination.
use std::time::Duration;

use tokio::time::Instant;

/// Adjusts `delay` against a scheduled end, reading the clock.
///
/// Returns `None` when sleeping would reach or pass `end` and
/// `run_till_end` is false; the caller must stop instead of oversleeping.
/// With `run_till_end` the delay is clamped to the time left. Without an
/// end the delay is returned unchanged.
#[must_use]
pub fn adjust_delay(delay: Duration, end: Option<Instant>, run_till_end: bool) -> Option<Duration> {
    adjust_delay_at(Instant::now(), delay, end, run_till_end)
}

/// Clamping form: never returns more than the time left before `end`.
#[must_use]
pub fn clamp_delay(delay: Duration, end: Option<Instant>) -> Duration {
    adjust_delay(delay, end, true).unwrap_or(Duration::ZERO)
}

#[must_use]
pub fn adjust_delay_at(
    now: Instant,
    delay: Duration,
    end: Option<Instant>,
    run_till_end: bool,
) -> Option<Duration> {
    let Some(end) = end else {
        return Some(delay);
    };
    let remaining = end.saturating_duration_since(now);
    if delay < remaining {
        return Some(delay);
    }
    if run_till_end { Some(remaining) } else { None }
}

/// Resolves once `end` is reached. Without an end it never resolves, so
/// it can sit in a `select!` next to the wait it bounds.
pub async fn end_reached(end: Option<Instant>) {
    match end {
        Some(end) => tokio::time::sleep_until(end).await,
        None => std::future::pending::<()>().await,
    }
}

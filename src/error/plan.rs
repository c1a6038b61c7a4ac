use thiserror::Error;

/// Test plan configuration errors, raised before any virtual user starts or
/// at the point of use for registry conflicts.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Test plan has no thread groups.")]
    NoThreadGroups,
    #[error("Thread group '{group}' must run at least one thread.")]
    NoThreads { group: String },
    #[error("Thread group '{group}' has a scheduled end before its start.")]
    EndBeforeStart { group: String },
    #[error("Constant throughput timer '{node}' at {path} needs a finite throughput > 0 (got {value}).")]
    InvalidThroughput {
        node: String,
        path: String,
        value: f64,
    },
    #[error("Sync timer '{barrier}' needs a group size >= 1.")]
    BarrierGroupSizeZero { barrier: String },
    #[error("Sync timer '{barrier}' has non-positive timeout {timeout_ms}ms.")]
    BarrierTimeoutNotPositive { barrier: String, timeout_ms: i64 },
    #[error("Sync timer '{barrier}' is already registered with a different group size or timeout.")]
    BarrierMismatch { barrier: String },
    #[error("Timer '{node}' at {path} has an invalid distribution: {reason}")]
    InvalidTimer {
        node: String,
        path: String,
        reason: &'static str,
    },
    #[error("No sampler registered for kind '{kind}' (node '{node}' at {path}).")]
    UnknownSampler {
        node: String,
        path: String,
        kind: String,
    },
    #[error("No processor registered for kind '{kind}' (node '{node}' at {path}).")]
    UnknownProcessor {
        node: String,
        path: String,
        kind: String,
    },
    #[error("No listener registered for kind '{kind}' (node '{node}' at {path}).")]
    UnknownListener {
        node: String,
        path: String,
        kind: String,
    },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
}

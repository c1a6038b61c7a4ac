use std::path::Path;

use serde::Serialize;

use crate::engine::{ExitReason, RunSummary};
use crate::error::{AppError, AppResult, ConfigError};

pub(crate) fn summary_lines(title: &str, summary: &RunSummary) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!("{}:", title));
    lines.push(format!("samples: {}", summary.samples));
    lines.push(format!("errors: {}", summary.errors));
    lines.push(format!("threads_started: {}", summary.threads_started));
    lines.push(format!(
        "latency_ms: min {} / mean {} / p50 {} / p90 {} / p99 {} / max {}",
        summary.min_ms,
        summary.mean_ms,
        summary.p50_ms,
        summary.p90_ms,
        summary.p99_ms,
        summary.max_ms
    ));
    for (reason, count) in &summary.exits {
        lines.push(format!("exit {}: {}", exit_label(*reason), count));
    }
    lines
}

const fn exit_label(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::IterationsDone => "iterations_done",
        ExitReason::ScheduledEnd => "scheduled_end",
        ExitReason::Stopped => "stopped",
        ExitReason::ListenerFailed => "listener_failed",
        ExitReason::SampleErrorPolicy => "sample_error_policy",
        ExitReason::ConfigurationError => "configuration_error",
    }
}

pub(crate) fn print_summary(title: &str, summary: &RunSummary) {
    for line in summary_lines(title, summary) {
        println!("{}", line);
    }
}

/// Writes any serializable summary as pretty JSON.
pub(crate) fn write_summary_json<T: Serialize>(path: &Path, summary: &T) -> AppResult<()> {
    let body = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, body).map_err(|err| {
        AppError::config(ConfigError::WriteSummary {
            path: path.to_path_buf(),
            source: err,
        })
    })
}

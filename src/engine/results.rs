use std::collections::BTreeMap;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::AppResult;

use super::ExitReason;

/// Outcome of one sampler invocation. Target failures are carried here and
/// never raised as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleResult {
    pub label: String,
    pub success: bool,
    pub elapsed: Duration,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub response_code: String,
    #[serde(default)]
    pub message: String,
}

impl SampleResult {
    pub fn success(label: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            label: label.into(),
            success: true,
            elapsed,
            payload: String::new(),
            response_code: String::new(),
            message: String::new(),
        }
    }

    pub fn failure(label: impl Into<String>, elapsed: Duration, message: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            success: false,
            elapsed,
            payload: String::new(),
            response_code: String::new(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    #[must_use]
    pub fn with_response_code(mut self, code: impl Into<String>) -> Self {
        self.response_code = code.into();
        self
    }
}

/// A sample result tagged with the virtual user that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub group: String,
    pub thread: u32,
    pub iteration: u64,
    pub result: SampleResult,
}

/// Aggregate of one engine run, also reported by remote agents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub samples: u64,
    pub errors: u64,
    pub threads_started: u64,
    pub min_ms: u64,
    pub mean_ms: u64,
    pub p50_ms: u64,
    pub p90_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
    #[serde(default)]
    pub exits: BTreeMap<ExitReason, u64>,
}

impl RunSummary {
    #[must_use]
    pub fn exits_with(&self, reason: ExitReason) -> u64 {
        self.exits.get(&reason).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
struct LatencyHistogram {
    hist: Histogram<u64>,
}

impl LatencyHistogram {
    fn new() -> AppResult<Self> {
        Ok(Self {
            hist: Histogram::<u64>::new(3)?,
        })
    }

    fn record(&mut self, latency_ms: u64) {
        if let Err(err) = self.hist.record(latency_ms.max(1)) {
            warn!("Failed to record latency {}ms: {}", latency_ms, err);
        }
    }

    fn percentiles(&self) -> (u64, u64, u64) {
        if self.hist.len() == 0 {
            return (0, 0, 0);
        }
        (
            self.hist.value_at_quantile(0.5),
            self.hist.value_at_quantile(0.9),
            self.hist.value_at_quantile(0.99),
        )
    }
}

/// Drains sample records until every sender is gone and folds them into a
/// summary. Thread counts and exit reasons are filled in by the engine.
pub(crate) async fn collect(mut records: mpsc::Receiver<SampleRecord>) -> AppResult<RunSummary> {
    let mut histogram = LatencyHistogram::new()?;
    let mut summary = RunSummary::default();
    let mut total_ms: u128 = 0;
    let mut min_ms = u64::MAX;

    while let Some(record) = records.recv().await {
        let latency_ms = u64::try_from(record.result.elapsed.as_millis()).unwrap_or(u64::MAX);
        summary.samples = summary.samples.saturating_add(1);
        if !record.result.success {
            summary.errors = summary.errors.saturating_add(1);
        }
        total_ms = total_ms.saturating_add(u128::from(latency_ms));
        min_ms = min_ms.min(latency_ms);
        summary.max_ms = summary.max_ms.max(latency_ms);
        histogram.record(latency_ms);
    }

    if summary.samples > 0 {
        summary.min_ms = min_ms;
        let mean = total_ms
            .checked_div(u128::from(summary.samples))
            .unwrap_or(0);
        summary.mean_ms = u64::try_from(mean).unwrap_or(u64::MAX);
        let (p50, p90, p99) = histogram.percentiles();
        summary.p50_ms = p50;
        summary.p90_ms = p90;
        summary.p99_ms = p99;
    }
    Ok(summary)
}

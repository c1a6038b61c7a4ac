use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{AppResult, ListenerError};

use super::capability::{
    ComponentRef, Listener, Processor, SampleContext, Sampler, ThreadInfo, Variables,
};
use super::results::{SampleRecord, SampleResult};

const DEFAULT_USER_AGENT: &str = concat!("throng/", env!("CARGO_PKG_VERSION"));
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

fn millis_property(component: &ComponentRef<'_>, key: &str) -> Option<Duration> {
    component
        .property(key)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn flag_property(component: &ComponentRef<'_>, key: &str, default: bool) -> bool {
    match component.property(key).map(str::trim) {
        Some("true") => true,
        Some("false") => false,
        Some(_) | None => default,
    }
}

/// Synthetic sampler: waits `latency_ms`, then reports `success`,
/// `response_code` and `payload` as configured. `echo` copies a variable
/// into the payload instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugSampler;

#[async_trait]
impl Sampler for DebugSampler {
    async fn sample(&self, component: ComponentRef<'_>, ctx: &SampleContext<'_>) -> SampleResult {
        let started = Instant::now();
        if let Some(latency) = millis_property(&component, "latency_ms") {
            tokio::time::sleep(latency).await;
        }
        let payload = component.property("echo").map_or_else(
            || component.property("payload").unwrap_or_default().to_owned(),
            |variable| ctx.variables.get(variable).cloned().unwrap_or_default(),
        );
        let code = component.property("response_code").unwrap_or("200");
        let elapsed = started.elapsed();
        let result = if flag_property(&component, "success", true) {
            SampleResult::success(component.name, elapsed)
        } else {
            let message = component.property("message").unwrap_or("debug failure");
            SampleResult::failure(component.name, elapsed, message)
        };
        result.with_payload(payload).with_response_code(code)
    }
}

/// HTTP sampler on a shared reqwest client. Properties: `url`, `method`
/// (default GET), `body`, `timeout_ms`, `expected_status`.
#[derive(Debug, Clone)]
pub struct HttpSampler {
    client: Client,
}

impl HttpSampler {
    /// # Errors
    ///
    /// Returns an error if the client cannot be built.
    pub fn new() -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Sampler for HttpSampler {
    async fn sample(&self, component: ComponentRef<'_>, _ctx: &SampleContext<'_>) -> SampleResult {
        let started = Instant::now();
        let Some(url) = component.property("url") else {
            return SampleResult::failure(component.name, Duration::ZERO, "missing 'url' property");
        };
        let method_name = component.property("method").unwrap_or("GET");
        let Ok(method) = Method::from_bytes(method_name.to_ascii_uppercase().as_bytes()) else {
            return SampleResult::failure(
                component.name,
                Duration::ZERO,
                format!("invalid method '{}'", method_name),
            );
        };
        let mut request = self.client.request(method, url);
        if let Some(body) = component.property("body") {
            request = request.body(body.to_owned());
        }
        if let Some(timeout) = millis_property(&component, "timeout_ms") {
            request = request.timeout(timeout);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                debug!("HTTP sample '{}' failed: {}", component.name, err);
                return SampleResult::failure(component.name, started.elapsed(), err.to_string());
            }
        };
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                return SampleResult::failure(component.name, started.elapsed(), err.to_string())
                    .with_response_code(status.as_str());
            }
        };
        let elapsed = started.elapsed();
        let ok = match component
            .property("expected_status")
            .and_then(|value| value.trim().parse::<u16>().ok())
        {
            Some(expected) => status.as_u16() == expected,
            None => status.is_success(),
        };
        let result = if ok {
            SampleResult::success(component.name, elapsed)
        } else {
            SampleResult::failure(component.name, elapsed, format!("unexpected status {}", status))
        };
        result
            .with_response_code(status.as_str())
            .with_payload(body)
    }
}

/// Sets `name` to `value` before each sample in scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetVariable;

impl Processor for SetVariable {
    fn process(
        &self,
        component: ComponentRef<'_>,
        variables: &mut Variables,
        _sample: Option<&SampleResult>,
    ) {
        if let Some(name) = component.property("name") {
            let value = component.property("value").unwrap_or_default();
            variables.insert(name.to_owned(), value.to_owned());
        }
    }
}

/// Copies part of the last sample into `variable`. `source` is one of
/// `payload` (default), `response_code`, `success` or `message`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capture;

impl Processor for Capture {
    fn process(
        &self,
        component: ComponentRef<'_>,
        variables: &mut Variables,
        sample: Option<&SampleResult>,
    ) {
        let (Some(variable), Some(sample)) = (component.property("variable"), sample) else {
            return;
        };
        let value = match component.property("source").unwrap_or("payload") {
            "response_code" => sample.response_code.clone(),
            "success" => sample.success.to_string(),
            "message" => sample.message.clone(),
            _ => sample.payload.clone(),
        };
        variables.insert(variable.to_owned(), value);
    }
}

/// Logs every sample in scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogListener;

impl Listener for LogListener {
    fn sample_occurred(
        &self,
        component: ComponentRef<'_>,
        record: &SampleRecord,
    ) -> Result<(), ListenerError> {
        info!(
            "[{}] {}#{} {} ok={} {}ms {}",
            component.name,
            record.group,
            record.thread,
            record.result.label,
            record.result.success,
            record.result.elapsed.as_millis(),
            record.result.response_code
        );
        Ok(())
    }
}

/// Keeps running totals across every thread and logs them as threads
/// finish.
#[derive(Debug, Default)]
pub struct SummaryListener {
    samples: AtomicU64,
    errors: AtomicU64,
}

impl SummaryListener {
    #[must_use]
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

impl Listener for SummaryListener {
    fn thread_finished(
        &self,
        component: ComponentRef<'_>,
        thread: ThreadInfo<'_>,
    ) -> Result<(), ListenerError> {
        info!(
            "[{}] {}#{} finished; totals so far: {} samples, {} errors",
            component.name,
            thread.group,
            thread.thread,
            self.samples(),
            self.errors()
        );
        Ok(())
    }

    fn sample_occurred(
        &self,
        _component: ComponentRef<'_>,
        record: &SampleRecord,
    ) -> Result<(), ListenerError> {
        self.samples.fetch_add(1, Ordering::Relaxed);
        if !record.result.success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

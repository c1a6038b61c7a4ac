use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::RunSummary;
use crate::error::{AgentFailure, AppError, AppResult, DistributedError};

use super::protocol::ConfigureMessage;
use super::transport::AgentTransport;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Extra connect attempts after the first one.
    pub retries: u32,
    /// Pause between two attempts on the same agent.
    pub retry_delay: Duration,
    /// Carry on with the reachable agents when some cannot be configured.
    pub continue_on_fail: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            continue_on_fail: false,
        }
    }
}

/// An agent only counts as up once it is both connected and configured;
/// a connection whose configure call fails is closed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Disconnected,
    Configured,
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatus {
    pub address: String,
    pub state: AgentState,
    pub last_error: Option<String>,
}

/// Outcome of bringing the agent list up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<AgentFailure>,
}

/// Outcome of one start/stop/shutdown/exit fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<AgentFailure>,
}

struct AgentSlot<H> {
    status: AgentStatus,
    handle: Option<H>,
}

/// Drives a fixed list of remote agents through configure, run, stop or
/// shutdown, and exit.
pub struct DistributedRunner<T: AgentTransport> {
    transport: T,
    options: CoordinatorOptions,
    agents: Vec<AgentSlot<T::Handle>>,
}

impl<T: AgentTransport> DistributedRunner<T> {
    pub const fn new(transport: T, options: CoordinatorOptions) -> Self {
        Self {
            transport,
            options,
            agents: Vec::new(),
        }
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Connects to and configures every address concurrently, retrying each
    /// one on its own.
    ///
    /// # Errors
    ///
    /// Without `continue_on_fail`, returns one error naming every agent that
    /// could not be configured; the agents that did come up are released
    /// first and none of them is started.
    pub async fn init(
        &mut self,
        addresses: &[String],
        config: &ConfigureMessage,
    ) -> AppResult<InitReport> {
        let mut unique: Vec<&String> = Vec::with_capacity(addresses.len());
        for address in addresses {
            if !unique.contains(&address) {
                unique.push(address);
            }
        }
        let outcomes = join_all(
            unique
                .iter()
                .map(|address| self.bring_up(address.as_str(), config)),
        )
        .await;

        let mut report = InitReport::default();
        for (address, outcome) in unique.into_iter().zip(outcomes) {
            self.agents.retain(|slot| slot.status.address != *address);
            match outcome {
                Ok(handle) => {
                    info!("Agent {} configured", address);
                    report.succeeded.push(address.clone());
                    self.agents.push(AgentSlot {
                        status: AgentStatus {
                            address: address.clone(),
                            state: AgentState::Configured,
                            last_error: None,
                        },
                        handle: Some(handle),
                    });
                }
                Err(reason) => {
                    warn!("Agent {} could not be configured: {}", address, reason);
                    report.failed.push(AgentFailure {
                        address: address.clone(),
                        reason: reason.clone(),
                    });
                    self.agents.push(AgentSlot {
                        status: AgentStatus {
                            address: address.clone(),
                            state: AgentState::Disconnected,
                            last_error: Some(reason),
                        },
                        handle: None,
                    });
                }
            }
        }

        if !report.failed.is_empty() && !self.options.continue_on_fail {
            let configured = report.succeeded.clone();
            self.exit(Some(configured.as_slice())).await;
            return Err(AppError::distributed(DistributedError::AgentsUnavailable {
                failures: report.failed,
            }));
        }
        if report.succeeded.is_empty() {
            warn!("No remote agent could be configured; continuing with none");
        }
        Ok(report)
    }

    async fn bring_up(&self, address: &str, config: &ConfigureMessage) -> Result<T::Handle, String> {
        let attempts = self.options.retries.saturating_add(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.options.retry_delay).await;
            }
            debug!("Connecting to {} (attempt {}/{})", address, attempt, attempts);
            let handle = match self.transport.connect(address).await {
                Ok(handle) => handle,
                Err(err) => {
                    last_error = err.to_string();
                    continue;
                }
            };
            match self.transport.configure(&handle, config).await {
                Ok(()) => return Ok(handle),
                Err(err) => {
                    last_error = err.to_string();
                    if let Err(exit_err) = self.transport.exit(&handle).await {
                        debug!("Releasing {} after failed configure: {}", address, exit_err);
                    }
                }
            }
        }
        Err(last_error)
    }

    /// Starts the plan on every targeted agent without waiting for it.
    pub async fn start(&mut self, addresses: Option<&[String]>) -> LifecycleReport {
        let report = self
            .fan_out(addresses, |transport, handle| transport.run(handle))
            .await;
        self.mark(&report, AgentState::Running);
        report
    }

    /// Immediate termination: in-flight samples are abandoned.
    pub async fn stop(&mut self, addresses: Option<&[String]>) -> LifecycleReport {
        self.terminate(addresses, true).await
    }

    /// Graceful termination: in-flight samples finish first.
    pub async fn shutdown(&mut self, addresses: Option<&[String]>) -> LifecycleReport {
        self.terminate(addresses, false).await
    }

    async fn terminate(&mut self, addresses: Option<&[String]>, immediate: bool) -> LifecycleReport {
        let report = self
            .fan_out(addresses, |transport, handle| transport.stop(handle, immediate))
            .await;
        self.mark(&report, AgentState::Stopped);
        report
    }

    /// Releases the targeted agents. Calling it again for an agent that was
    /// already released does nothing.
    pub async fn exit(&mut self, addresses: Option<&[String]>) -> LifecycleReport {
        let report = self
            .fan_out(addresses, |transport, handle| transport.exit(handle))
            .await;
        let released: Vec<&String> = report
            .succeeded
            .iter()
            .chain(report.failed.iter().map(|failure| &failure.address))
            .collect();
        for slot in &mut self.agents {
            if released.contains(&&slot.status.address) {
                slot.handle = None;
                slot.status.state = AgentState::Disconnected;
            }
        }
        report
    }

    /// Polls the running agents until none is active and returns each one's
    /// last summary.
    ///
    /// # Errors
    ///
    /// Returns an error naming the agents still active at the deadline.
    pub async fn wait_for_finish(
        &mut self,
        poll: Duration,
        timeout: Duration,
    ) -> AppResult<Vec<(String, Option<RunSummary>)>> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let mut pending = Vec::new();
            for slot in &self.agents {
                let (Some(handle), AgentState::Running) = (&slot.handle, slot.status.state) else {
                    continue;
                };
                match self.transport.is_active(handle).await {
                    Ok(true) => pending.push(slot.status.address.clone()),
                    Ok(false) => {}
                    Err(err) => warn!("Status of {} unavailable: {}", slot.status.address, err),
                }
            }
            if pending.is_empty() {
                break;
            }
            if deadline.is_some_and(|limit| Instant::now() >= limit) {
                return Err(AppError::distributed(DistributedError::FinishTimeout { pending }));
            }
            tokio::time::sleep(poll).await;
        }

        let mut summaries = Vec::new();
        for slot in &mut self.agents {
            let Some(handle) = &slot.handle else {
                continue;
            };
            if !matches!(slot.status.state, AgentState::Running | AgentState::Stopped) {
                continue;
            }
            let summary = match self.transport.last_summary(handle).await {
                Ok(summary) => summary,
                Err(err) => {
                    slot.status.last_error = Some(err.to_string());
                    None
                }
            };
            slot.status.state = AgentState::Stopped;
            summaries.push((slot.status.address.clone(), summary));
        }
        Ok(summaries)
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<AgentStatus> {
        self.agents.iter().map(|slot| slot.status.clone()).collect()
    }

    /// Agents that are still held by the coordinator.
    #[must_use]
    pub fn active_addresses(&self) -> Vec<String> {
        self.agents
            .iter()
            .filter(|slot| slot.handle.is_some())
            .map(|slot| slot.status.address.clone())
            .collect()
    }

    /// Sends one request to every targeted agent concurrently. Addresses the
    /// coordinator does not hold are skipped; one agent's failure never
    /// keeps the others from being reached.
    async fn fan_out<'runner, F, Fut>(
        &'runner self,
        addresses: Option<&[String]>,
        call: F,
    ) -> LifecycleReport
    where
        F: Fn(&'runner T, &'runner T::Handle) -> Fut,
        Fut: Future<Output = AppResult<()>> + 'runner,
    {
        let transport = &self.transport;
        let targets: Vec<(&String, &T::Handle)> = self
            .agents
            .iter()
            .filter(|slot| addresses.is_none_or(|wanted| wanted.contains(&slot.status.address)))
            .filter_map(|slot| slot.handle.as_ref().map(|handle| (&slot.status.address, handle)))
            .collect();
        let outcomes = join_all(targets.iter().map(|(_, handle)| call(transport, handle))).await;

        let mut report = LifecycleReport::default();
        for ((address, _), outcome) in targets.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.succeeded.push(address.clone()),
                Err(err) => {
                    warn!("Agent {}: {}", address, err);
                    report.failed.push(AgentFailure {
                        address: address.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        report
    }

    fn mark(&mut self, report: &LifecycleReport, state: AgentState) {
        for slot in &mut self.agents {
            if report.succeeded.contains(&slot.status.address) {
                slot.status.state = state;
                slot.status.last_error = None;
            } else if let Some(failure) = report
                .failed
                .iter()
                .find(|failure| failure.address == slot.status.address)
            {
                slot.status.last_error = Some(failure.reason.clone());
            }
        }
    }
}

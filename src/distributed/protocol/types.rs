use serde::{Deserialize, Serialize};

use crate::engine::RunSummary;
use crate::plan::TestPlan;

const fn default_timer_factor() -> f64 {
    1.0
}

/// Coordinator to agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Configure(Box<ConfigureMessage>),
    Run,
    Stop(StopMessage),
    Status,
    Exit,
}

/// Agent to coordinator; every request gets exactly one reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Ack,
    Status(StatusMessage),
    Error(ErrorMessage),
}

/// Compiled plan pushed to an agent, with the run options it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigureMessage {
    pub plan: TestPlan,
    #[serde(default = "default_timer_factor")]
    pub timer_factor: f64,
}

impl ConfigureMessage {
    #[must_use]
    pub const fn new(plan: TestPlan) -> Self {
        Self {
            plan,
            timer_factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopMessage {
    pub immediate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub configured: bool,
    pub running: bool,
    #[serde(default)]
    pub summary: Option<RunSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

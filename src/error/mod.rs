mod app;
mod config;
mod distributed;
mod listener;
mod plan;
mod validation;

#[cfg(test)]
mod test_support;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use distributed::{AgentFailure, DistributedError};
pub use listener::ListenerError;
pub use plan::PlanError;
pub use validation::ValidationError;

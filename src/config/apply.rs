use std::time::Duration;

use crate::args::RunArgs;
use crate::distributed::CoordinatorOptions;
use crate::error::{AppError, AppResult};

use super::parse::parse_duration_value;
use super::types::RemoteConfig;

/// Agent list and coordinator options after merging the plan file's
/// `[remote]` table with command-line flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub agents: Vec<String>,
    pub options: CoordinatorOptions,
}

/// Merges the `[remote]` table with CLI flags; a flag always wins over the
/// file. Returns `None` when no agent is named anywhere, which means a local
/// run.
///
/// # Errors
///
/// Returns an error when the file's `retry_delay` is not a valid duration.
pub fn remote_settings(
    file: Option<&RemoteConfig>,
    args: &RunArgs,
) -> AppResult<Option<RemoteSettings>> {
    let defaults = CoordinatorOptions::default();
    let agents = match (&args.remote, file) {
        (Some(agents), _) => agents.clone(),
        (None, Some(remote)) => remote.agents.clone(),
        (None, None) => Vec::new(),
    };
    if agents.is_empty() {
        return Ok(None);
    }

    let file_delay = match file.and_then(|remote| remote.retry_delay.as_deref()) {
        Some(value) => Some(parse_duration_value(value).map_err(AppError::validation)?),
        None => None,
    };
    let retry_delay = args
        .retry_delay_ms
        .map(Duration::from_millis)
        .or(file_delay)
        .unwrap_or(defaults.retry_delay);
    let retries = args
        .retries
        .or_else(|| file.and_then(|remote| remote.retries))
        .unwrap_or(defaults.retries);
    let continue_on_fail = args.continue_on_fail
        || file
            .and_then(|remote| remote.continue_on_fail)
            .unwrap_or(defaults.continue_on_fail);

    Ok(Some(RemoteSettings {
        agents,
        options: CoordinatorOptions {
            retries,
            retry_delay,
            continue_on_fail,
        },
    }))
}

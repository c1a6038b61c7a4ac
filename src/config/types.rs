use serde::Deserialize;

use crate::plan::TestPlan;

/// Top-level plan file: the test plan itself plus an optional `[remote]`
/// table for distributed runs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanFile {
    #[serde(flatten)]
    pub plan: TestPlan,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    #[serde(default)]
    pub agents: Vec<String>,
    pub retries: Option<u32>,
    /// Delay between connect attempts, e.g. `"500ms"` or `"5s"`.
    pub retry_delay: Option<String>,
    pub continue_on_fail: Option<bool>,
}

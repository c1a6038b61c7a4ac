use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Variable holding the outcome of the previous sample ("true"/"false").
pub const LAST_SAMPLE_OK: &str = "THRONG_LAST_SAMPLE_OK";

const fn default_threads() -> u32 {
    1
}

const fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<ThreadGroupSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadGroupSpec {
    pub name: String,
    #[serde(default = "default_threads")]
    pub threads: u32,
    #[serde(default)]
    pub ramp_up_ms: u64,
    /// Iterations per virtual user; `None` loops until stopped or the
    /// scheduled end is reached.
    #[serde(default)]
    pub loops: Option<u64>,
    #[serde(default)]
    pub scheduler: Option<SchedulerSpec>,
    #[serde(default)]
    pub on_sample_error: OnSampleError,
    #[serde(default)]
    pub tree: Vec<Node>,
}

/// Scheduled window for a thread group. Absolute times win over the
/// relative offsets when both are given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSpec {
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_delay_ms: Option<u64>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnSampleError {
    #[default]
    Continue,
    StartNextLoop,
    StopThread,
    StopTest,
    StopTestNow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThroughputMode {
    /// Spacing of `60000 / R` ms, tracked per virtual user.
    #[default]
    #[serde(alias = "per_thread")]
    ThisThreadOnly,
    /// Spacing scaled by every virtual user currently running.
    AllActiveThreads,
    /// Spacing scaled by the virtual users that have completed a sample.
    AllActiveThreadsOnceStarted,
    /// One run-wide schedule shared by every virtual user of every group,
    /// spaced `60000 / R` ms.
    AllActiveThreadsShared,
    /// Spacing scaled by the running virtual users of the caller's group.
    AllActiveThreadsInGroup,
    /// One schedule per thread group, spaced `60000 / R` ms.
    AllActiveThreadsInGroupShared,
}

impl ThroughputMode {
    /// Paced from a schedule shared between virtual users.
    #[must_use]
    pub const fn is_shared(self) -> bool {
        matches!(
            self,
            Self::AllActiveThreadsShared | Self::AllActiveThreadsInGroupShared
        )
    }

    /// Counts or schedules only within the caller's thread group.
    #[must_use]
    pub const fn is_group_scoped(self) -> bool {
        matches!(
            self,
            Self::AllActiveThreadsInGroup | Self::AllActiveThreadsInGroupShared
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    SimpleController,
    LoopController {
        count: u64,
    },
    OnceOnlyController,
    InterleaveController,
    TransactionController,
    CriticalSection {
        #[serde(default)]
        lock: String,
    },
    Sampler {
        kind: String,
        #[serde(default)]
        properties: BTreeMap<String, String>,
    },
    ConstantTimer {
        delay_ms: u64,
    },
    UniformRandomTimer {
        #[serde(default)]
        delay_ms: u64,
        range_ms: u64,
    },
    GaussianRandomTimer {
        #[serde(default)]
        delay_ms: u64,
        deviation_ms: u64,
    },
    ConstantThroughputTimer {
        throughput: f64,
        #[serde(default)]
        mode: ThroughputMode,
    },
    SyncTimer {
        group_size: u32,
        #[serde(default)]
        timeout_ms: Option<i64>,
    },
    PreProcessor {
        kind: String,
        #[serde(default)]
        properties: BTreeMap<String, String>,
    },
    PostProcessor {
        kind: String,
        #[serde(default)]
        properties: BTreeMap<String, String>,
    },
    Listener {
        kind: String,
        #[serde(default)]
        properties: BTreeMap<String, String>,
    },
}

impl NodeKind {
    #[must_use]
    pub const fn is_controller(&self) -> bool {
        matches!(
            self,
            Self::SimpleController
                | Self::LoopController { .. }
                | Self::OnceOnlyController
                | Self::InterleaveController
                | Self::TransactionController
                | Self::CriticalSection { .. }
        )
    }

    #[must_use]
    pub const fn is_timer(&self) -> bool {
        matches!(
            self,
            Self::ConstantTimer { .. }
                | Self::UniformRandomTimer { .. }
                | Self::GaussianRandomTimer { .. }
                | Self::ConstantThroughputTimer { .. }
                | Self::SyncTimer { .. }
        )
    }

    /// Samplers and controllers are walked; everything else applies to the
    /// samplers in its scope.
    #[must_use]
    pub const fn is_samplable(&self) -> bool {
        self.is_controller() || matches!(self, Self::Sampler { .. })
    }
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            kind,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn sampler(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::new(
            name,
            NodeKind::Sampler {
                kind: kind.into(),
                properties: BTreeMap::new(),
            },
        )
    }

    /// Adds a property to a capability-backed node; other kinds ignore it.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.kind {
            NodeKind::Sampler { properties, .. }
            | NodeKind::PreProcessor { properties, .. }
            | NodeKind::PostProcessor { properties, .. }
            | NodeKind::Listener { properties, .. } => {
                properties.insert(key.into(), value.into());
            }
            NodeKind::SimpleController
            | NodeKind::LoopController { .. }
            | NodeKind::OnceOnlyController
            | NodeKind::InterleaveController
            | NodeKind::TransactionController
            | NodeKind::CriticalSection { .. }
            | NodeKind::ConstantTimer { .. }
            | NodeKind::UniformRandomTimer { .. }
            | NodeKind::GaussianRandomTimer { .. }
            | NodeKind::ConstantThroughputTimer { .. }
            | NodeKind::SyncTimer { .. } => {}
        }
        self
    }
}

impl ThreadGroupSpec {
    pub fn new(name: impl Into<String>, threads: u32, tree: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            threads,
            ramp_up_ms: 0,
            loops: Some(1),
            scheduler: None,
            on_sample_error: OnSampleError::Continue,
            tree,
        }
    }
}

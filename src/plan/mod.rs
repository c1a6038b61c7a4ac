//! Compiled test plan model.
//!
//! A plan is a list of thread groups; each group owns an immutable tree of
//! typed nodes that every virtual user of the group walks independently.
//! Nodes are addressed by [`NodePath`] so per-user state can be keyed by
//! position instead of living inside the tree.
mod node;
mod path;
mod validate;


pub use node::{
    LAST_SAMPLE_OK, Node, NodeKind, OnSampleError, SchedulerSpec, TestPlan, ThreadGroupSpec,
    ThroughputMode,
};
pub use path::NodePath;
pub use validate::validate_plan;

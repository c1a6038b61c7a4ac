use std::collections::HashMap;

use crate::error::PlanError;
use crate::sync::BarrierConfig;

use super::{Node, NodeKind, NodePath, TestPlan};

/// Checks the structural configuration of a plan before any virtual user is
/// started. Capability kinds are checked separately by the registry that
/// resolves them.
///
/// # Errors
///
/// Returns the first configuration error found, naming the offending group,
/// node or barrier. Sync timers sharing a name share one barrier across all
/// thread groups, so their settings must agree plan-wide.
pub fn validate_plan(plan: &TestPlan) -> Result<(), PlanError> {
    if plan.groups.is_empty() {
        return Err(PlanError::NoThreadGroups);
    }
    let mut barriers = HashMap::new();
    for group in &plan.groups {
        if group.threads == 0 {
            return Err(PlanError::NoThreads {
                group: group.name.clone(),
            });
        }
        if let Some(scheduler) = &group.scheduler
            && let (Some(start), Some(end)) = (scheduler.start_at, scheduler.end_at)
            && end <= start
        {
            return Err(PlanError::EndBeforeStart {
                group: group.name.clone(),
            });
        }
        validate_nodes(&NodePath::root(), &group.tree, &mut barriers)?;
    }
    Ok(())
}

fn validate_nodes<'plan>(
    prefix: &NodePath,
    nodes: &'plan [Node],
    barriers: &mut HashMap<&'plan str, BarrierConfig>,
) -> Result<(), PlanError> {
    for (index, node) in nodes.iter().enumerate() {
        let path = prefix.child(index);
        if !node.enabled {
            continue;
        }
        validate_node(&path, node, barriers)?;
        validate_nodes(&path, &node.children, barriers)?;
    }
    Ok(())
}

fn validate_node<'plan>(
    path: &NodePath,
    node: &'plan Node,
    barriers: &mut HashMap<&'plan str, BarrierConfig>,
) -> Result<(), PlanError> {
    match &node.kind {
        NodeKind::ConstantThroughputTimer { throughput, .. } => {
            if !throughput.is_finite() || *throughput <= 0.0 {
                return Err(PlanError::InvalidThroughput {
                    node: node.name.clone(),
                    path: path.to_string(),
                    value: *throughput,
                });
            }
        }
        NodeKind::SyncTimer {
            group_size,
            timeout_ms,
        } => {
            let config = BarrierConfig::new(&node.name, *group_size, *timeout_ms)?;
            let registered = *barriers.entry(node.name.as_str()).or_insert(config);
            if registered != config {
                return Err(PlanError::BarrierMismatch {
                    barrier: node.name.clone(),
                });
            }
        }
        NodeKind::UniformRandomTimer { range_ms, .. } => {
            if *range_ms == 0 {
                return Err(PlanError::InvalidTimer {
                    node: node.name.clone(),
                    path: path.to_string(),
                    reason: "range_ms must be > 0",
                });
            }
        }
        NodeKind::SimpleController
        | NodeKind::LoopController { .. }
        | NodeKind::OnceOnlyController
        | NodeKind::InterleaveController
        | NodeKind::TransactionController
        | NodeKind::CriticalSection { .. }
        | NodeKind::Sampler { .. }
        | NodeKind::ConstantTimer { .. }
        | NodeKind::GaussianRandomTimer { .. }
        | NodeKind::PreProcessor { .. }
        | NodeKind::PostProcessor { .. }
        | NodeKind::Listener { .. } => {}
    }
    Ok(())
}

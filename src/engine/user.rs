use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::ListenerError;
use crate::pacing;
use crate::plan::{
    LAST_SAMPLE_OK, Node, NodeKind, NodePath, OnSampleError, ThreadGroupSpec, ThroughputMode,
};
use crate::shutdown::{StopMode, StopReceiver, request_stop};
use crate::sync::{ArriveOutcome, BarrierConfig, NamedLockGuard};
use crate::timers::{ScheduleScope, StatisticalTimer, ThroughputTimer};

use super::RunContext;
use super::capability::{Capabilities, ComponentRef, SampleContext, ThreadInfo, Variables};
use super::counters::ThreadGuard;
use super::results::{SampleRecord, SampleResult};

/// Why a virtual user stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    IterationsDone,
    ScheduledEnd,
    Stopped,
    ListenerFailed,
    SampleErrorPolicy,
    ConfigurationError,
}

/// Resolved start and optional end of a virtual user's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub(crate) start: Instant,
    pub(crate) end: Option<Instant>,
}

enum Flow {
    Continue,
    NextIteration,
    Exit(ExitReason),
}

#[derive(Debug, Default)]
struct TransactionFrame {
    samples: u64,
    failures: u64,
    elapsed: Duration,
}

impl TransactionFrame {
    fn add(&mut self, result: &SampleResult) {
        self.samples = self.samples.saturating_add(1);
        if !result.success {
            self.failures = self.failures.saturating_add(1);
        }
        self.elapsed = self.elapsed.saturating_add(result.elapsed);
    }
}

pub(crate) struct UserSetup {
    pub(crate) group: Arc<ThreadGroupSpec>,
    pub(crate) thread: u32,
    pub(crate) window: Window,
    pub(crate) context: Arc<RunContext>,
    pub(crate) caps: Arc<Capabilities>,
    pub(crate) results: mpsc::Sender<SampleRecord>,
    pub(crate) stop: StopReceiver,
    pub(crate) timer_factor: f64,
}

/// One simulated client walking its group's tree. All mutable state lives
/// here, keyed by node path; the tree itself is shared read-only.
pub(crate) struct VirtualUser {
    group: Arc<ThreadGroupSpec>,
    thread: u32,
    window: Window,
    context: Arc<RunContext>,
    caps: Arc<Capabilities>,
    results: mpsc::Sender<SampleRecord>,
    stop: StopReceiver,
    timer_factor: f64,
    guards: Vec<ThreadGuard>,
    variables: Variables,
    iteration: u64,
    last_sample_ok: bool,
    visits: HashMap<NodePath, u64>,
    throughput: HashMap<NodePath, ThroughputTimer>,
    transactions: Vec<TransactionFrame>,
    held_locks: Vec<String>,
    rng: StdRng,
}

impl VirtualUser {
    pub(crate) fn new(setup: UserSetup) -> Self {
        Self {
            group: setup.group,
            thread: setup.thread,
            window: setup.window,
            context: setup.context,
            caps: setup.caps,
            results: setup.results,
            stop: setup.stop,
            timer_factor: setup.timer_factor,
            guards: Vec::new(),
            variables: Variables::new(),
            iteration: 0,
            last_sample_ok: true,
            visits: HashMap::new(),
            throughput: HashMap::new(),
            transactions: Vec::new(),
            held_locks: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }

    pub(crate) async fn run(mut self) -> ExitReason {
        if let Some(end) = self.window.end
            && self.window.start >= end
        {
            debug!("{}#{} starts after its end; skipping", self.group.name, self.thread);
            return ExitReason::ScheduledEnd;
        }
        if !self.sleep_until(self.window.start).await {
            return ExitReason::Stopped;
        }

        self.guards = vec![
            ThreadGuard::enter(Arc::clone(&self.context.counters)),
            ThreadGuard::enter(self.context.group_counters(&self.group.name)),
        ];
        let group = Arc::clone(&self.group);
        let lifecycle = lifecycle_listeners(&group.tree);
        let reason = match self.notify_lifecycle(&lifecycle, true) {
            Ok(()) => self.iterate(&group.tree).await,
            Err(err) => {
                error!("{}#{} stopped: {}", group.name, self.thread, err);
                ExitReason::ListenerFailed
            }
        };
        if let Err(err) = self.notify_lifecycle(&lifecycle, false) {
            warn!("{}#{}: {}", group.name, self.thread, err);
        }
        self.guards.clear();
        debug!("{}#{} exited: {:?}", group.name, self.thread, reason);
        reason
    }

    async fn iterate(&mut self, tree: &[Node]) -> ExitReason {
        loop {
            if let Some(limit) = self.group.loops
                && self.iteration >= limit
            {
                return ExitReason::IterationsDone;
            }
            if self.stop.is_stopped() {
                return ExitReason::Stopped;
            }
            if self.past_end(Instant::now()) {
                return ExitReason::ScheduledEnd;
            }
            self.transactions.clear();
            match self.run_children(tree, &NodePath::root(), tree).await {
                Ok(Flow::Continue | Flow::NextIteration) => {}
                Ok(Flow::Exit(reason)) => return reason,
                Err(err) => {
                    error!("{}#{} stopped: {}", self.group.name, self.thread, err);
                    return ExitReason::ListenerFailed;
                }
            }
            self.iteration = self.iteration.saturating_add(1);
            tokio::task::yield_now().await;
        }
    }

    fn run_children<'a>(
        &'a mut self,
        tree: &'a [Node],
        parent: &'a NodePath,
        children: &'a [Node],
    ) -> BoxFuture<'a, Result<Flow, ListenerError>> {
        async move {
            for (index, child) in children.iter().enumerate() {
                if !child.enabled || !child.kind.is_samplable() {
                    continue;
                }
                let path = parent.child(index);
                match self.run_node(tree, &path, child).await? {
                    Flow::Continue => {}
                    flow @ (Flow::NextIteration | Flow::Exit(_)) => return Ok(flow),
                }
            }
            Ok(Flow::Continue)
        }
        .boxed()
    }

    fn run_node<'a>(
        &'a mut self,
        tree: &'a [Node],
        path: &'a NodePath,
        node: &'a Node,
    ) -> BoxFuture<'a, Result<Flow, ListenerError>> {
        async move {
            match &node.kind {
                NodeKind::SimpleController => self.run_children(tree, path, &node.children).await,
                NodeKind::LoopController { count } => {
                    for _ in 0..*count {
                        match self.run_children(tree, path, &node.children).await? {
                            Flow::Continue => {}
                            flow @ (Flow::NextIteration | Flow::Exit(_)) => return Ok(flow),
                        }
                    }
                    Ok(Flow::Continue)
                }
                NodeKind::OnceOnlyController => {
                    if self.visit(path) > 0 {
                        return Ok(Flow::Continue);
                    }
                    self.run_children(tree, path, &node.children).await
                }
                NodeKind::InterleaveController => {
                    let walkable: Vec<usize> = node
                        .children
                        .iter()
                        .enumerate()
                        .filter(|(_, child)| child.enabled && child.kind.is_samplable())
                        .map(|(index, _)| index)
                        .collect();
                    if walkable.is_empty() {
                        return Ok(Flow::Continue);
                    }
                    let turn = self.visit(path);
                    let slot = usize::try_from(turn)
                        .unwrap_or(0)
                        .checked_rem(walkable.len())
                        .unwrap_or(0);
                    let Some((index, child)) = walkable
                        .get(slot)
                        .and_then(|index| node.children.get(*index).map(|child| (*index, child)))
                    else {
                        return Ok(Flow::Continue);
                    };
                    let child_path = path.child(index);
                    self.run_node(tree, &child_path, child).await
                }
                NodeKind::TransactionController => self.run_transaction(tree, path, node).await,
                NodeKind::CriticalSection { lock } => {
                    self.run_critical_section(tree, path, node, lock).await
                }
                NodeKind::Sampler { kind, .. } => self.sample(tree, path, node, kind).await,
                NodeKind::ConstantTimer { .. }
                | NodeKind::UniformRandomTimer { .. }
                | NodeKind::GaussianRandomTimer { .. }
                | NodeKind::ConstantThroughputTimer { .. }
                | NodeKind::SyncTimer { .. }
                | NodeKind::PreProcessor { .. }
                | NodeKind::PostProcessor { .. }
                | NodeKind::Listener { .. } => Ok(Flow::Continue),
            }
        }
        .boxed()
    }

    /// Returns how many times `path` was visited before this call.
    fn visit(&mut self, path: &NodePath) -> u64 {
        let visits = self.visits.entry(path.clone()).or_insert(0);
        let previous = *visits;
        *visits = visits.saturating_add(1);
        previous
    }

    async fn run_transaction(
        &mut self,
        tree: &[Node],
        path: &NodePath,
        node: &Node,
    ) -> Result<Flow, ListenerError> {
        self.transactions.push(TransactionFrame::default());
        let flow = self.run_children(tree, path, &node.children).await;
        let frame = self.transactions.pop().unwrap_or_default();
        let flow = flow?;
        if frame.samples > 0 {
            let result = if frame.failures == 0 {
                SampleResult::success(&node.name, frame.elapsed)
            } else {
                SampleResult::failure(
                    &node.name,
                    frame.elapsed,
                    format!("{} of {} samples failed", frame.failures, frame.samples),
                )
            };
            if let Some(outer) = self.transactions.last_mut() {
                outer.add(&result);
            }
            let scoped = path.scoped(tree);
            self.publish(&scoped, result).await?;
        }
        Ok(flow)
    }

    async fn run_critical_section(
        &mut self,
        tree: &[Node],
        path: &NodePath,
        node: &Node,
        lock: &str,
    ) -> Result<Flow, ListenerError> {
        let reentrant = self.held_locks.iter().any(|held| held == lock);
        let guard: Option<NamedLockGuard> = if reentrant {
            None
        } else {
            let context = Arc::clone(&self.context);
            tokio::select! {
                guard = context.locks.acquire(lock) => guard,
                () = pacing::end_reached(self.window.end) => {
                    return Ok(Flow::Exit(ExitReason::ScheduledEnd));
                }
                _ = self.stop.stopped() => return Ok(Flow::Exit(ExitReason::Stopped)),
            }
        };
        if guard.is_some() {
            self.held_locks.push(lock.to_owned());
        }
        let flow = self.run_children(tree, path, &node.children).await;
        if guard.is_some() {
            self.held_locks.retain(|held| held != lock);
        }
        drop(guard);
        flow
    }

    async fn sample(
        &mut self,
        tree: &[Node],
        path: &NodePath,
        node: &Node,
        kind: &str,
    ) -> Result<Flow, ListenerError> {
        let scoped = path.scoped(tree);
        let Some(component) = ComponentRef::from_node(node) else {
            return Ok(Flow::Continue);
        };

        self.run_processors(&scoped, true, None);

        let delay = match self.timer_delay(&scoped).await {
            Ok(delay) => delay,
            Err(reason) => return Ok(Flow::Exit(reason)),
        };
        match pacing::adjust_delay(delay, self.window.end, false) {
            None => return Ok(Flow::Exit(ExitReason::ScheduledEnd)),
            Some(delay) if !delay.is_zero() => {
                if !self.sleep_for(delay).await {
                    return Ok(Flow::Exit(ExitReason::Stopped));
                }
            }
            Some(_) => {}
        }
        if self.stop.is_stopped() {
            return Ok(Flow::Exit(ExitReason::Stopped));
        }

        let result = match self.caps.sampler(kind) {
            Some(sampler) => {
                let ctx = SampleContext {
                    group: &self.group.name,
                    thread: self.thread,
                    iteration: self.iteration,
                    variables: &self.variables,
                };
                let mut stop = self.stop.clone();
                tokio::select! {
                    result = sampler.sample(component, &ctx) => result,
                    () = stop.stopped_immediately() => return Ok(Flow::Exit(ExitReason::Stopped)),
                }
            }
            None => SampleResult::failure(
                &node.name,
                Duration::ZERO,
                format!("no sampler registered for '{}'", kind),
            ),
        };
        for guard in &mut self.guards {
            guard.mark_sampling();
        }

        self.run_processors(&scoped, false, Some(&result));
        self.last_sample_ok = result.success;
        self.variables
            .insert(LAST_SAMPLE_OK.to_owned(), result.success.to_string());
        if let Some(frame) = self.transactions.last_mut() {
            frame.add(&result);
        }
        let success = result.success;
        self.publish(&scoped, result).await?;

        if !success && let Some(flow) = self.apply_error_policy() {
            return Ok(flow);
        }
        if self.past_end(Instant::now()) {
            return Ok(Flow::Exit(ExitReason::ScheduledEnd));
        }
        Ok(Flow::Continue)
    }

    fn run_processors(
        &mut self,
        scoped: &[(NodePath, &Node)],
        pre: bool,
        sample: Option<&SampleResult>,
    ) {
        for (_, node) in scoped {
            let (NodeKind::PreProcessor { kind, .. } | NodeKind::PostProcessor { kind, .. }) =
                &node.kind
            else {
                continue;
            };
            if matches!(node.kind, NodeKind::PreProcessor { .. }) != pre {
                continue;
            }
            let (Some(processor), Some(component)) =
                (self.caps.processor(kind), ComponentRef::from_node(node))
            else {
                continue;
            };
            processor.process(component, &mut self.variables, sample);
        }
    }

    /// Sums every timer in scope. Sync timers block here until their group
    /// is released.
    async fn timer_delay(&mut self, scoped: &[(NodePath, &Node)]) -> Result<Duration, ExitReason> {
        let mut total = Duration::ZERO;
        for (timer_path, node) in scoped {
            let delay = if let Some(timer) = StatisticalTimer::from_kind(&node.kind) {
                StatisticalTimer::scale(timer.delay(&mut self.rng), self.timer_factor)
            } else if let NodeKind::ConstantThroughputTimer { throughput, mode } = &node.kind {
                self.throughput_delay(timer_path, *throughput, *mode)
            } else if let NodeKind::SyncTimer {
                group_size,
                timeout_ms,
            } = &node.kind
            {
                self.rendezvous(&node.name, *group_size, *timeout_ms).await?;
                Duration::ZERO
            } else {
                Duration::ZERO
            };
            total = total.saturating_add(delay);
        }
        Ok(total)
    }

    fn throughput_delay(
        &mut self,
        timer_path: &NodePath,
        throughput: f64,
        mode: ThroughputMode,
    ) -> Duration {
        if mode.is_shared() {
            let scope = if mode.is_group_scoped() {
                ScheduleScope::Group(self.group.name.clone())
            } else {
                ScheduleScope::Run
            };
            return self
                .context
                .schedules
                .delay_at(&scope, throughput, Instant::now());
        }
        let counters = if mode.is_group_scoped() {
            self.context.group_counters(&self.group.name)
        } else {
            Arc::clone(&self.context.counters)
        };
        self.throughput
            .entry(timer_path.clone())
            .or_insert_with(|| ThroughputTimer::new(throughput, mode))
            .delay(&counters)
    }

    async fn rendezvous(
        &mut self,
        name: &str,
        group_size: u32,
        timeout_ms: Option<i64>,
    ) -> Result<(), ExitReason> {
        let barrier = BarrierConfig::new(name, group_size, timeout_ms)
            .and_then(|config| self.context.barriers.get_or_create(name, config));
        let barrier = match barrier {
            Ok(barrier) => barrier,
            Err(err) => {
                error!("{}#{}: {}", self.group.name, self.thread, err);
                return Err(ExitReason::ConfigurationError);
            }
        };
        match barrier.arrive(&mut self.stop, self.window.end).await {
            ArriveOutcome::Released | ArriveOutcome::TimedOut => Ok(()),
            ArriveOutcome::Cancelled => Err(ExitReason::Stopped),
            ArriveOutcome::EndReached => Err(ExitReason::ScheduledEnd),
        }
    }

    /// Sends the record to the collector and notifies scoped listeners.
    async fn publish(
        &mut self,
        scoped: &[(NodePath, &Node)],
        result: SampleResult,
    ) -> Result<(), ListenerError> {
        let record = SampleRecord {
            group: self.group.name.clone(),
            thread: self.thread,
            iteration: self.iteration,
            result,
        };
        let mut failure = None;
        for (_, node) in scoped {
            let NodeKind::Listener { kind, .. } = &node.kind else {
                continue;
            };
            let (Some(listener), Some(component)) =
                (self.caps.listener(kind), ComponentRef::from_node(node))
            else {
                continue;
            };
            match listener.sample_occurred(component, &record) {
                Ok(()) => {}
                Err(err) if err.is_recoverable() => {
                    warn!("{}#{}: {}", self.group.name, self.thread, err);
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if self.results.send(record).await.is_err() {
            debug!("Result collector closed; dropping sample record");
        }
        failure.map_or(Ok(()), Err)
    }

    fn apply_error_policy(&self) -> Option<Flow> {
        match self.group.on_sample_error {
            OnSampleError::Continue => None,
            OnSampleError::StartNextLoop => Some(Flow::NextIteration),
            OnSampleError::StopThread => Some(Flow::Exit(ExitReason::SampleErrorPolicy)),
            OnSampleError::StopTest => {
                request_stop(&self.context.stop, StopMode::Graceful);
                Some(Flow::Exit(ExitReason::SampleErrorPolicy))
            }
            OnSampleError::StopTestNow => {
                request_stop(&self.context.stop, StopMode::Immediate);
                Some(Flow::Exit(ExitReason::SampleErrorPolicy))
            }
        }
    }

    fn notify_lifecycle(&self, listeners: &[&Node], started: bool) -> Result<(), ListenerError> {
        let thread = ThreadInfo {
            group: &self.group.name,
            thread: self.thread,
        };
        for node in listeners {
            let NodeKind::Listener { kind, .. } = &node.kind else {
                continue;
            };
            let (Some(listener), Some(component)) =
                (self.caps.listener(kind), ComponentRef::from_node(node))
            else {
                continue;
            };
            let outcome = if started {
                listener.thread_started(component, thread)
            } else {
                listener.thread_finished(component, thread)
            };
            match outcome {
                Ok(()) => {}
                Err(err) if err.is_recoverable() => {
                    warn!("{}#{}: {}", self.group.name, self.thread, err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn past_end(&self, now: Instant) -> bool {
        self.window.end.is_some_and(|end| now >= end)
    }

    async fn sleep_for(&mut self, delay: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            _ = self.stop.stopped() => false,
        }
    }

    async fn sleep_until(&mut self, at: Instant) -> bool {
        if at <= Instant::now() {
            return !self.stop.is_stopped();
        }
        tokio::select! {
            () = tokio::time::sleep_until(at) => true,
            _ = self.stop.stopped() => false,
        }
    }
}

/// Every enabled listener in the tree, in tree order.
fn lifecycle_listeners(tree: &[Node]) -> Vec<&Node> {
    let mut listeners = Vec::new();
    collect_listeners(tree, &mut listeners);
    listeners
}

fn collect_listeners<'tree>(nodes: &'tree [Node], listeners: &mut Vec<&'tree Node>) {
    for node in nodes.iter().filter(|node| node.enabled) {
        if matches!(node.kind, NodeKind::Listener { .. }) {
            listeners.push(node);
        }
        collect_listeners(&node.children, listeners);
    }
}

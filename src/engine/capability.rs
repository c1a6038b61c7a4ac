use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppResult, ListenerError, PlanError};
use crate::plan::{Node, NodeKind, NodePath, TestPlan};

use super::builtins;
use super::results::{SampleRecord, SampleResult};

/// Per-user variables shared by processors and samplers.
pub type Variables = HashMap<String, String>;

/// The tree node a capability was resolved for.
#[derive(Debug, Clone, Copy)]
pub struct ComponentRef<'tree> {
    pub name: &'tree str,
    pub kind: &'tree str,
    pub properties: &'tree BTreeMap<String, String>,
}

impl<'tree> ComponentRef<'tree> {
    /// Returns `None` for nodes that are not backed by a capability.
    #[must_use]
    pub fn from_node(node: &'tree Node) -> Option<Self> {
        match &node.kind {
            NodeKind::Sampler { kind, properties }
            | NodeKind::PreProcessor { kind, properties }
            | NodeKind::PostProcessor { kind, properties }
            | NodeKind::Listener { kind, properties } => Some(Self {
                name: &node.name,
                kind,
                properties,
            }),
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
            | NodeKind::SyncTimer { .. } => None,
        }
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&'tree str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// What a sampler sees of the virtual user invoking it.
#[derive(Debug, Clone, Copy)]
pub struct SampleContext<'user> {
    pub group: &'user str,
    pub thread: u32,
    pub iteration: u64,
    pub variables: &'user Variables,
}

/// Identity handed to thread lifecycle listeners.
#[derive(Debug, Clone, Copy)]
pub struct ThreadInfo<'user> {
    pub group: &'user str,
    pub thread: u32,
}

/// Protocol sampler. Failures talking to the target belong in the returned
/// result, not in a panic or an error.
#[async_trait]
pub trait Sampler: Send + Sync {
    async fn sample(&self, component: ComponentRef<'_>, ctx: &SampleContext<'_>) -> SampleResult;
}

/// Pre- or post-processor. Post-processors get the sample that just ran.
pub trait Processor: Send + Sync {
    fn process(
        &self,
        component: ComponentRef<'_>,
        variables: &mut Variables,
        sample: Option<&SampleResult>,
    );
}

/// Thread lifecycle and sample listener. Every hook defaults to a no-op.
pub trait Listener: Send + Sync {
    /// # Errors
    ///
    /// Recoverable errors are logged; unrecoverable ones stop the thread.
    fn thread_started(
        &self,
        _component: ComponentRef<'_>,
        _thread: ThreadInfo<'_>,
    ) -> Result<(), ListenerError> {
        Ok(())
    }

    /// # Errors
    ///
    /// Errors are logged; the thread is already finishing.
    fn thread_finished(
        &self,
        _component: ComponentRef<'_>,
        _thread: ThreadInfo<'_>,
    ) -> Result<(), ListenerError> {
        Ok(())
    }

    /// # Errors
    ///
    /// Recoverable errors are logged; unrecoverable ones stop the thread
    /// after releasing any critical section it holds.
    fn sample_occurred(
        &self,
        _component: ComponentRef<'_>,
        _record: &SampleRecord,
    ) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// Maps the `kind` strings found in a plan to capability implementations.
#[derive(Clone, Default)]
pub struct Capabilities {
    samplers: HashMap<String, Arc<dyn Sampler>>,
    processors: HashMap<String, Arc<dyn Processor>>,
    listeners: HashMap<String, Arc<dyn Listener>>,
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut samplers: Vec<&String> = self.samplers.keys().collect();
        let mut processors: Vec<&String> = self.processors.keys().collect();
        let mut listeners: Vec<&String> = self.listeners.keys().collect();
        samplers.sort();
        processors.sort();
        listeners.sort();
        f.debug_struct("Capabilities")
            .field("samplers", &samplers)
            .field("processors", &processors)
            .field("listeners", &listeners)
            .finish()
    }
}

impl Capabilities {
    /// Registry with the built-in `debug` and `http` samplers, the
    /// `set_variable` and `capture` processors and the `log` and `summary`
    /// listeners.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_builtins() -> AppResult<Self> {
        let mut caps = Self::default();
        caps.register_sampler("debug", builtins::DebugSampler);
        caps.register_sampler("http", builtins::HttpSampler::new()?);
        caps.register_processor("set_variable", builtins::SetVariable);
        caps.register_processor("capture", builtins::Capture);
        caps.register_listener("log", builtins::LogListener);
        caps.register_listener("summary", builtins::SummaryListener::default());
        Ok(caps)
    }

    pub fn register_sampler(&mut self, kind: impl Into<String>, sampler: impl Sampler + 'static) {
        self.samplers.insert(kind.into(), Arc::new(sampler));
    }

    pub fn register_processor(
        &mut self,
        kind: impl Into<String>,
        processor: impl Processor + 'static,
    ) {
        self.processors.insert(kind.into(), Arc::new(processor));
    }

    pub fn register_listener(
        &mut self,
        kind: impl Into<String>,
        listener: impl Listener + 'static,
    ) {
        self.listeners.insert(kind.into(), Arc::new(listener));
    }

    /// Registers an already shared listener, so a caller can keep a handle
    /// to inspect it after the run.
    pub fn register_shared_listener(&mut self, kind: impl Into<String>, listener: Arc<dyn Listener>) {
        self.listeners.insert(kind.into(), listener);
    }

    #[must_use]
    pub fn sampler(&self, kind: &str) -> Option<Arc<dyn Sampler>> {
        self.samplers.get(kind).cloned()
    }

    #[must_use]
    pub fn processor(&self, kind: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(kind).cloned()
    }

    #[must_use]
    pub fn listener(&self, kind: &str) -> Option<Arc<dyn Listener>> {
        self.listeners.get(kind).cloned()
    }

    /// Checks that every enabled capability node in the plan resolves.
    ///
    /// # Errors
    ///
    /// Returns the first unknown kind, naming the node and its path.
    pub fn check_plan(&self, plan: &TestPlan) -> Result<(), PlanError> {
        for group in &plan.groups {
            self.check_nodes(&NodePath::root(), &group.tree)?;
        }
        Ok(())
    }

    fn check_nodes(&self, prefix: &NodePath, nodes: &[Node]) -> Result<(), PlanError> {
        for (index, node) in nodes.iter().enumerate() {
            if !node.enabled {
                continue;
            }
            let path = prefix.child(index);
            self.check_node(&path, node)?;
            self.check_nodes(&path, &node.children)?;
        }
        Ok(())
    }

    fn check_node(&self, path: &NodePath, node: &Node) -> Result<(), PlanError> {
        match &node.kind {
            NodeKind::Sampler { kind, .. } if !self.samplers.contains_key(kind) => {
                Err(PlanError::UnknownSampler {
                    node: node.name.clone(),
                    path: path.to_string(),
                    kind: kind.clone(),
                })
            }
            NodeKind::PreProcessor { kind, .. } | NodeKind::PostProcessor { kind, .. }
                if !self.processors.contains_key(kind) =>
            {
                Err(PlanError::UnknownProcessor {
                    node: node.name.clone(),
                    path: path.to_string(),
                    kind: kind.clone(),
                })
            }
            NodeKind::Listener { kind, .. } if !self.listeners.contains_key(kind) => {
                Err(PlanError::UnknownListener {
                    node: node.name.clone(),
                    path: path.to_string(),
                    kind: kind.clone(),
                })
            }
            NodeKind::SimpleController
            | NodeKind::LoopController { .. }
            | NodeKind::OnceOnlyController
            | NodeKind::InterleaveController
            | NodeKind::TransactionController
            | NodeKind::CriticalSection { .. }
            | NodeKind::Sampler { .. }
            | NodeKind::ConstantTimer { .. }
            | NodeKind::UniformRandomTimer { .. }
            | NodeKind::GaussianRandomTimer { .. }
            | NodeKind::ConstantThroughputTimer { .. }
            | NodeKind::SyncTimer { .. }
            | NodeKind::PreProcessor { .. }
            | NodeKind::PostProcessor { .. }
            | NodeKind::Listener { .. } => Ok(()),
        }
    }
}

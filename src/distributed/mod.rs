//! Remote execution: the agent server that hosts an engine, the transport
//! that talks to it and the coordinator that drives a fleet of agents.
mod agent;
mod coordinator;
mod protocol;
mod transport;

pub use agent::{run_agent, serve_agent};
pub use coordinator::{
    AgentState, AgentStatus, CoordinatorOptions, DistributedRunner, InitReport, LifecycleReport,
};
pub use protocol::{ConfigureMessage, Reply, Request, StatusMessage};
pub use transport::{AgentTransport, TcpHandle, TcpTransport};

use std::fmt;

use thiserror::Error;

/// One agent that could not be brought up, with the last error seen for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFailure {
    pub address: String,
    pub reason: String,
}

impl fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.reason)
    }
}

fn list_failures(failures: &[AgentFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum DistributedError {
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection error to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Timed out connecting to {addr}.")]
    ConnectTimeout { addr: String },
    #[error("Timed out waiting for a reply from {addr}.")]
    ReplyTimeout { addr: String },
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Connection closed.")]
    ConnectionClosed,
    #[error("Wire message exceeded max size ({max_bytes} bytes).")]
    WireMessageTooLarge { max_bytes: usize },
    #[error("Wire message was not valid UTF-8: {source}")]
    WireMessageInvalidUtf8 {
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("Serialization error during {context}: {source}")]
    Serialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Deserialization error during {context}: {source}")]
    Deserialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unexpected reply from agent (expected {expected}).")]
    UnexpectedReply { expected: &'static str },
    #[error("Remote error: {message}")]
    Remote { message: String },
    #[error("Following remote agents could not be configured: {}", list_failures(.failures))]
    AgentsUnavailable { failures: Vec<AgentFailure> },
    #[error("Timed out waiting for agents to finish: {}", .pending.join(", "))]
    FinishTimeout { pending: Vec<String> },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::engine::RunSummary;
use crate::error::{AppError, AppResult, DistributedError};

use super::protocol::{
    ConfigureMessage, Reply, Request, StatusMessage, StopMessage, read_message, send_message,
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How the coordinator reaches its agents. Implementations decide what a
/// handle is; the coordinator only passes it back.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    type Handle: Send + Sync;

    /// # Errors
    ///
    /// Returns an error if the agent cannot be reached.
    async fn connect(&self, address: &str) -> AppResult<Self::Handle>;

    /// # Errors
    ///
    /// Returns an error if the agent rejects or never acknowledges the plan.
    async fn configure(&self, handle: &Self::Handle, config: &ConfigureMessage) -> AppResult<()>;

    /// Starts the configured plan without waiting for it to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent refuses to start.
    async fn run(&self, handle: &Self::Handle) -> AppResult<()>;

    /// # Errors
    ///
    /// Returns an error if the stop request cannot be delivered.
    async fn stop(&self, handle: &Self::Handle, immediate: bool) -> AppResult<()>;

    /// Releases the agent; it stops any run and closes the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the exit request cannot be delivered.
    async fn exit(&self, handle: &Self::Handle) -> AppResult<()>;

    /// # Errors
    ///
    /// Returns an error if the agent cannot be queried.
    async fn is_active(&self, handle: &Self::Handle) -> AppResult<bool>;

    /// Summary of the agent's last finished run, if it reports one.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent cannot be queried.
    async fn last_summary(&self, _handle: &Self::Handle) -> AppResult<Option<RunSummary>> {
        Ok(None)
    }
}

/// Newline-delimited JSON over TCP, one request in flight per agent.
#[derive(Debug, Clone, Copy)]
pub struct TcpTransport {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }
}

impl TcpTransport {
    #[must_use]
    pub const fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }
}

#[derive(Debug)]
struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

#[derive(Debug)]
pub struct TcpHandle {
    address: String,
    connection: Mutex<Connection>,
}

impl TcpHandle {
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn request(&self, request: &Request, timeout: Duration) -> AppResult<Reply> {
        let mut connection = self.connection.lock().await;
        let exchange = async {
            send_message(&mut connection.writer, request).await?;
            read_message::<_, Reply>(&mut connection.reader).await
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(reply) => reply,
            Err(_elapsed) => Err(AppError::distributed(DistributedError::ReplyTimeout {
                addr: self.address.clone(),
            })),
        }
    }

    async fn expect_ack(&self, request: &Request, timeout: Duration) -> AppResult<()> {
        match self.request(request, timeout).await? {
            Reply::Ack => Ok(()),
            Reply::Error(error) => Err(AppError::distributed(DistributedError::Remote {
                message: error.message,
            })),
            Reply::Status(_) => Err(AppError::distributed(DistributedError::UnexpectedReply {
                expected: "ack",
            })),
        }
    }

    async fn status(&self, timeout: Duration) -> AppResult<StatusMessage> {
        match self.request(&Request::Status, timeout).await? {
            Reply::Status(status) => Ok(status),
            Reply::Error(error) => Err(AppError::distributed(DistributedError::Remote {
                message: error.message,
            })),
            Reply::Ack => Err(AppError::distributed(DistributedError::UnexpectedReply {
                expected: "status",
            })),
        }
    }
}

#[async_trait]
impl AgentTransport for TcpTransport {
    type Handle = TcpHandle;

    async fn connect(&self, address: &str) -> AppResult<TcpHandle> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_elapsed| {
                AppError::distributed(DistributedError::ConnectTimeout {
                    addr: address.to_owned(),
                })
            })?
            .map_err(|err| {
                AppError::distributed(DistributedError::Connection {
                    addr: address.to_owned(),
                    source: err,
                })
            })?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", address, err);
        }
        let (read_half, write_half) = stream.into_split();
        debug!("Connected to agent {}", address);
        Ok(TcpHandle {
            address: address.to_owned(),
            connection: Mutex::new(Connection {
                reader: BufReader::new(read_half),
                writer: write_half,
            }),
        })
    }

    async fn configure(&self, handle: &TcpHandle, config: &ConfigureMessage) -> AppResult<()> {
        let request = Request::Configure(Box::new(config.clone()));
        handle.expect_ack(&request, self.request_timeout).await
    }

    async fn run(&self, handle: &TcpHandle) -> AppResult<()> {
        handle.expect_ack(&Request::Run, self.request_timeout).await
    }

    async fn stop(&self, handle: &TcpHandle, immediate: bool) -> AppResult<()> {
        let request = Request::Stop(StopMessage { immediate });
        handle.expect_ack(&request, self.request_timeout).await
    }

    async fn exit(&self, handle: &TcpHandle) -> AppResult<()> {
        handle.expect_ack(&Request::Exit, self.request_timeout).await
    }

    async fn is_active(&self, handle: &TcpHandle) -> AppResult<bool> {
        Ok(handle.status(self.request_timeout).await?.running)
    }

    async fn last_summary(&self, handle: &TcpHandle) -> AppResult<Option<RunSummary>> {
        Ok(handle.status(self.request_timeout).await?.summary)
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{Capabilities, Engine, EngineOptions, RunSummary, StopHandle};
use crate::error::{AppError, AppResult, DistributedError};
use crate::shutdown::{StopMode, StopReceiver};

use super::protocol::{
    ConfigureMessage, ErrorMessage, Reply, Request, StatusMessage, read_message, send_message,
};

/// Binds `listen` and serves coordinator sessions until `stop` fires.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or accepting fails.
pub async fn run_agent(listen: &str, caps: Arc<Capabilities>, stop: StopReceiver) -> AppResult<()> {
    let listener = TcpListener::bind(listen).await.map_err(|err| {
        AppError::distributed(DistributedError::Bind {
            addr: listen.to_owned(),
            source: err,
        })
    })?;
    info!("Agent listening on {}", listener.local_addr()?);
    serve_agent(listener, caps, stop).await
}

/// Serves one coordinator session at a time on an already bound listener.
///
/// # Errors
///
/// Returns an error if accepting a connection fails.
pub async fn serve_agent(
    listener: TcpListener,
    caps: Arc<Capabilities>,
    mut stop: StopReceiver,
) -> AppResult<()> {
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted.map_err(|err| {
                AppError::distributed(DistributedError::Io {
                    context: "accept coordinator",
                    source: err,
                })
            })?,
            _ = stop.stopped() => {
                info!("Agent shutting down");
                return Ok(());
            }
        };
        info!("Coordinator connected from {}", peer);
        let mut session = AgentSession::new(Arc::clone(&caps));
        if let Err(err) = session.serve(stream, peer, &mut stop).await {
            warn!("Session with {} ended: {}", peer, err);
        }
        session.shutdown().await;
    }
}

struct ActiveRun {
    stop: StopHandle,
    task: JoinHandle<AppResult<RunSummary>>,
}

struct AgentSession {
    caps: Arc<Capabilities>,
    config: Option<ConfigureMessage>,
    run: Option<ActiveRun>,
    last_summary: Option<RunSummary>,
}

enum Next {
    Continue,
    Close,
}

impl AgentSession {
    fn new(caps: Arc<Capabilities>) -> Self {
        Self {
            caps,
            config: None,
            run: None,
            last_summary: None,
        }
    }

    async fn serve(
        &mut self,
        stream: TcpStream,
        peer: SocketAddr,
        stop: &mut StopReceiver,
    ) -> AppResult<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        loop {
            let request = tokio::select! {
                request = read_message::<_, Request>(&mut reader) => request,
                _ = stop.stopped() => return Ok(()),
            };
            let request = match request {
                Ok(request) => request,
                Err(AppError::Distributed(DistributedError::ConnectionClosed)) => {
                    info!("Coordinator {} disconnected", peer);
                    return Ok(());
                }
                Err(err) => return Err(err),
            };
            debug!("Request from {}: {:?}", peer, request);
            let (reply, next) = self.handle(request).await;
            send_message(&mut write_half, &reply).await?;
            if matches!(next, Next::Close) {
                info!("Coordinator {} released this agent", peer);
                return Ok(());
            }
        }
    }

    async fn handle(&mut self, request: Request) -> (Reply, Next) {
        self.reap().await;
        match request {
            Request::Configure(config) => {
                if self.run.is_some() {
                    return (error_reply("a run is in progress"), Next::Continue);
                }
                match self.build_engine(&config) {
                    Ok(_) => {
                        info!("Configured plan '{}'", config.plan.name);
                        self.config = Some(*config);
                        (Reply::Ack, Next::Continue)
                    }
                    Err(err) => (error_reply(err.to_string()), Next::Continue),
                }
            }
            Request::Run => (self.start_run(), Next::Continue),
            Request::Stop(message) => {
                if let Some(run) = &self.run {
                    let mode = if message.immediate {
                        StopMode::Immediate
                    } else {
                        StopMode::Graceful
                    };
                    info!("Stop requested ({:?})", mode);
                    run.stop.stop(mode);
                }
                (Reply::Ack, Next::Continue)
            }
            Request::Status => (
                Reply::Status(StatusMessage {
                    configured: self.config.is_some(),
                    running: self.run.is_some(),
                    summary: self.last_summary.clone(),
                }),
                Next::Continue,
            ),
            Request::Exit => {
                self.shutdown().await;
                (Reply::Ack, Next::Close)
            }
        }
    }

    fn build_engine(&self, config: &ConfigureMessage) -> AppResult<Engine> {
        let options = EngineOptions {
            timer_factor: config.timer_factor,
            ..EngineOptions::default()
        };
        Engine::new(config.plan.clone(), Arc::clone(&self.caps), options)
    }

    fn start_run(&mut self) -> Reply {
        if self.run.is_some() {
            return error_reply("a run is already in progress");
        }
        let Some(config) = &self.config else {
            return error_reply("agent is not configured");
        };
        let engine = match self.build_engine(config) {
            Ok(engine) => engine,
            Err(err) => return error_reply(err.to_string()),
        };
        info!("Starting plan '{}'", engine.plan().name);
        let stop = engine.stop_handle();
        let task = tokio::spawn(async move { engine.run().await });
        self.run = Some(ActiveRun { stop, task });
        Reply::Ack
    }

    /// Collects the summary of a run that has finished on its own.
    async fn reap(&mut self) {
        if self.run.as_ref().is_some_and(|run| run.task.is_finished())
            && let Some(run) = self.run.take()
        {
            self.finish(run).await;
        }
    }

    async fn finish(&mut self, run: ActiveRun) {
        match run.task.await {
            Ok(Ok(summary)) => {
                info!(
                    "Run finished: {} samples, {} errors",
                    summary.samples, summary.errors
                );
                self.last_summary = Some(summary);
            }
            Ok(Err(err)) => warn!("Run failed: {}", err),
            Err(err) => warn!("Run task failed: {}", err),
        }
    }

    /// Stops any run immediately and waits for its users to exit.
    async fn shutdown(&mut self) {
        if let Some(run) = self.run.take() {
            run.stop.stop(StopMode::Immediate);
            self.finish(run).await;
        }
    }
}

fn error_reply(message: impl Into<String>) -> Reply {
    Reply::Error(ErrorMessage {
        message: message.into(),
    })
}

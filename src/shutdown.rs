use tokio::sync::watch;

/// How an engine run is being asked to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    Running,
    /// Finish the in-flight sample, then stop at the next boundary.
    Graceful,
    /// Abandon the in-flight sample as well.
    Immediate,
}

pub type StopSender = watch::Sender<StopMode>;

#[derive(Debug, Clone)]
pub struct StopReceiver(watch::Receiver<StopMode>);

#[must_use]
pub fn stop_channel() -> (StopSender, StopReceiver) {
    let (tx, rx) = watch::channel(StopMode::Running);
    (tx, StopReceiver(rx))
}

/// Requests a stop; an immediate request is never downgraded to graceful.
pub fn request_stop(sender: &StopSender, mode: StopMode) {
    sender.send_if_modified(|current| {
        let escalate = match mode {
            StopMode::Running => false,
            StopMode::Graceful => *current == StopMode::Running,
            StopMode::Immediate => *current != StopMode::Immediate,
        };
        if escalate {
            *current = mode;
        }
        escalate
    });
}

impl StopReceiver {
    #[must_use]
    pub fn from_sender(sender: &StopSender) -> Self {
        Self(sender.subscribe())
    }

    #[must_use]
    pub fn mode(&self) -> StopMode {
        *self.0.borrow()
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.mode() != StopMode::Running
    }

    /// Resolves once any stop has been requested.
    pub async fn stopped(&mut self) -> StopMode {
        self.wait_for(|mode| mode != StopMode::Running).await
    }

    /// Resolves once an immediate stop has been requested.
    pub async fn stopped_immediately(&mut self) {
        self.wait_for(|mode| mode == StopMode::Immediate).await;
    }

    async fn wait_for(&mut self, accept: impl Fn(StopMode) -> bool) -> StopMode {
        loop {
            let mode = *self.0.borrow_and_update();
            if accept(mode) {
                return mode;
            }
            if self.0.changed().await.is_err() {
                // Sender gone: nobody can request a stop anymore.
                std::future::pending::<()>().await;
            }
        }
    }
}

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::shutdown::{StopMode, StopReceiver, StopSender, request_stop};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Turns Ctrl+C or SIGTERM into a graceful stop request. The task ends on its
/// own once any stop has been requested through `sender`.
pub fn setup_signal_stop_handler(sender: StopSender) -> JoinHandle<()> {
    let mut observer = StopReceiver::from_sender(&sender);
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut term_signal = match signal(SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(err) => {
                warn!("Failed to register SIGTERM handler: {}", err);
                None
            }
        };

        #[cfg(unix)]
        let terminated = async {
            if let Some(signal) = term_signal.as_mut() {
                signal.recv().await;
            } else {
                std::future::pending::<()>().await;
            }
        };
        #[cfg(not(unix))]
        let terminated = std::future::pending::<()>();

        tokio::select! {
            _ = observer.stopped() => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!("Ctrl+C handler failed: {}", err);
                    return;
                }
                info!("Interrupted; stopping gracefully");
                request_stop(&sender, StopMode::Graceful);
            }
            () = terminated => {
                info!("Terminated; stopping gracefully");
                request_stop(&sender, StopMode::Graceful);
            }
        }
    })
}

//! Signal handling for graceful shutdown

use tracing::{debug, error, info};

use crate::hass::{Action, StateBridge};

/// Handles shutdown signals (SIGTERM, SIGINT)
pub struct ShutdownSignal;

impl ShutdownSignal {
    /// Create a new shutdown signal handler
    pub fn new() -> Self {
        Self
    }

    /// Wait for a shutdown signal
    #[cfg(unix)]
    pub async fn wait(&self) {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!(?e, "failed to register signal handlers, falling back to Ctrl-C");
                    Self::wait_ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                debug!("received SIGTERM");
            }
            _ = sigint.recv() => {
                debug!("received SIGINT");
            }
        }
    }

    /// Wait for a shutdown signal
    #[cfg(not(unix))]
    pub async fn wait(&self) {
        Self::wait_ctrl_c().await;
    }

    async fn wait_ctrl_c() {
        match tokio::signal::ctrl_c().await {
            Ok(()) => debug!("received Ctrl-C"),
            Err(e) => {
                error!(?e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort `turn_off` before the process exits
///
/// Failures are logged only. Returns whether the push succeeded.
pub async fn push_final_state<B>(bridge: &B) -> bool
where
    B: StateBridge + ?Sized,
{
    match bridge.set_state(Action::TurnOff).await {
        Ok(()) => {
            info!(action = %Action::TurnOff, "final Home Assistant state updated");
            true
        }
        Err(e) => {
            error!(kind = %e.kind(), error = %e, "failed to set final Home Assistant state");
            false
        }
    }
}

//! The monitoring loop
//!
//! Each cycle opens a fresh session, authenticates, resolves the local
//! client id, reads both mute flags and pushes the combined mic state to
//! Home Assistant when it changed. Any failure abandons the cycle; the loop
//! sleeps a flat interval and starts over until cancelled.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::events::MonitorEvent;
use crate::hass::{Action, StateBridge};
use crate::telnet::{Dialer, Endpoint, Session};

use super::guard::run_with_deadline;
use super::machine::{MicTracker, MuteFlags, Phase, INPUT_MUTED_FLAG, OUTPUT_MUTED_FLAG};

/// Timing and credentials for the loop
#[derive(Clone)]
pub struct MonitorSettings {
    pub endpoint: Endpoint,
    pub api_key: String,
    /// Deadline for each individual protocol operation
    pub operation_timeout: Duration,
    /// Pause between cycles, failed or not
    pub poll_interval: Duration,
}

impl MonitorSettings {
    pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(endpoint: Endpoint, api_key: impl Into<String>) -> Self {
        Self {
            endpoint,
            api_key: api_key.into(),
            operation_timeout: Self::DEFAULT_OPERATION_TIMEOUT,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }
}

impl std::fmt::Debug for MonitorSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorSettings")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("operation_timeout", &self.operation_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// Stage at which a cycle was abandoned
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleFailure {
    #[error("failed to connect to the client query interface")]
    Connect,
    #[error("failed to authenticate with the client query interface")]
    Authenticate,
    #[error("failed to retrieve clid")]
    ResolveIdentity,
    #[error("failed to retrieve muted status")]
    QueryFlags,
    #[error("failed to update Home Assistant state")]
    Push,
}

impl CycleFailure {
    pub fn stage(&self) -> &'static str {
        match self {
            CycleFailure::Connect => "connect",
            CycleFailure::Authenticate => "authenticate",
            CycleFailure::ResolveIdentity => "resolve_identity",
            CycleFailure::QueryFlags => "query_flags",
            CycleFailure::Push => "push",
        }
    }
}

/// Result of a completed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Mic state matched the last known state, nothing was pushed
    Unchanged { mic_active: bool },
    /// A new state was pushed to Home Assistant
    Pushed(Action),
}

/// Polls the client and mirrors its mic state
pub struct MonitorLoop<D, B> {
    settings: MonitorSettings,
    dialer: D,
    bridge: Arc<B>,
    tracker: MicTracker,
    phase: Phase,
    event_tx: broadcast::Sender<MonitorEvent>,
}

impl<D, B> MonitorLoop<D, B>
where
    D: Dialer,
    B: StateBridge,
{
    /// Seed the last known mic state from Home Assistant
    ///
    /// A failed initial read is returned to the caller and must stop startup.
    pub async fn start(
        settings: MonitorSettings,
        dialer: D,
        bridge: Arc<B>,
        event_tx: broadcast::Sender<MonitorEvent>,
    ) -> Result<Self> {
        let initial = bridge.get_state().await?;
        let tracker = MicTracker::seeded(&initial);
        info!(
            state = %initial,
            mic_active = tracker.last_known(),
            "initial Home Assistant state"
        );

        Ok(Self {
            settings,
            dialer,
            bridge,
            tracker,
            phase: Phase::Idle,
            event_tx,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Mic state last pushed to (or read from) Home Assistant
    pub fn last_known(&self) -> bool {
        self.tracker.last_known()
    }

    /// Run cycles until `cancel` fires
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(endpoint = %self.settings.endpoint, "monitoring loop started");

        while !cancel.is_cancelled() {
            match self.run_cycle(&cancel).await {
                Ok(CycleOutcome::Unchanged { mic_active }) => {
                    trace!(mic_active, "mic state unchanged");
                }
                Ok(CycleOutcome::Pushed(action)) => trace!(%action, "cycle pushed new state"),
                Err(failure) => {
                    if !cancel.is_cancelled() {
                        warn!(stage = failure.stage(), "{failure}");
                    }
                    let _ = self.event_tx.send(MonitorEvent::CycleFailed {
                        stage: failure.stage().to_string(),
                    });
                }
            }

            self.transition_to(Phase::Sleeping);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        self.transition_to(Phase::Stopped);
        let _ = self.event_tx.send(MonitorEvent::Stopped);
        info!("monitoring loop stopped");
    }

    /// Run a single cycle with a session scoped to it
    pub async fn run_cycle(
        &mut self,
        cancel: &CancellationToken,
    ) -> std::result::Result<CycleOutcome, CycleFailure> {
        let mut session = Session::new(self.settings.endpoint.clone());
        let flags = self.read_flags(&mut session, cancel).await;
        session.close().await;

        let flags = flags?;
        debug!(
            input_muted = %flags.input_muted,
            output_muted = %flags.output_muted,
            "mute flags read"
        );
        self.reconcile(flags.mic_active(), cancel).await
    }

    async fn read_flags(
        &mut self,
        session: &mut Session<D::Stream>,
        cancel: &CancellationToken,
    ) -> std::result::Result<MuteFlags, CycleFailure> {
        let deadline = self.settings.operation_timeout;

        self.transition_to(Phase::Connecting);
        run_with_deadline("connect", deadline, cancel, session.connect(&self.dialer))
            .await
            .ok_or(CycleFailure::Connect)?;

        self.transition_to(Phase::Authenticating);
        run_with_deadline(
            "authenticate",
            deadline,
            cancel,
            session.authenticate(&self.settings.api_key),
        )
        .await
        .ok_or(CycleFailure::Authenticate)?;

        self.transition_to(Phase::ResolvingIdentity);
        let clid = run_with_deadline("whoami", deadline, cancel, session.resolve_self())
            .await
            .ok_or(CycleFailure::ResolveIdentity)?;

        self.transition_to(Phase::QueryingFlags);
        let input_muted = run_with_deadline(
            INPUT_MUTED_FLAG,
            deadline,
            cancel,
            session.query_client_flag(&clid, INPUT_MUTED_FLAG),
        )
        .await
        .ok_or(CycleFailure::QueryFlags)?;
        let output_muted = run_with_deadline(
            OUTPUT_MUTED_FLAG,
            deadline,
            cancel,
            session.query_client_flag(&clid, OUTPUT_MUTED_FLAG),
        )
        .await
        .ok_or(CycleFailure::QueryFlags)?;

        Ok(MuteFlags {
            input_muted,
            output_muted,
        })
    }

    async fn reconcile(
        &mut self,
        mic_active: bool,
        cancel: &CancellationToken,
    ) -> std::result::Result<CycleOutcome, CycleFailure> {
        self.transition_to(Phase::ComparingState);
        let Some(action) = self.tracker.pending(mic_active) else {
            return Ok(CycleOutcome::Unchanged { mic_active });
        };

        self.transition_to(Phase::PushingState);
        let pushed = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%action, "push abandoned during shutdown");
                return Err(CycleFailure::Push);
            }
            result = self.bridge.set_state(action) => result,
        };
        if let Err(e) = pushed {
            // Left uncommitted so the next cycle pushes again
            if cancel.is_cancelled() {
                debug!(%action, error = %e, "push failed during shutdown");
            } else {
                warn!(%action, kind = %e.kind(), error = %e, "failed to push mic state");
            }
            return Err(CycleFailure::Push);
        }

        self.tracker.commit(mic_active);
        info!(mic_active, %action, "Home Assistant state updated");
        let _ = self.event_tx.send(MonitorEvent::mic(mic_active));
        Ok(CycleOutcome::Pushed(action))
    }

    fn transition_to(&mut self, next: Phase) {
        if next != self.phase {
            debug!(from = %self.phase, to = %next, "phase transition");
            self.phase = next;
        }
    }
}

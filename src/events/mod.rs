//! Events emitted by the monitoring loop
//!
//! Broadcast to any in-process observer, e.g. a tray icon that mirrors the
//! current mic state.

use serde::{Deserialize, Serialize};

/// Events emitted by the monitoring loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// Mic became live and Home Assistant was told so
    MicActivated,

    /// Mic was muted (input or output) and Home Assistant was told so
    MicDeactivated,

    /// A cycle was abandoned before completing
    CycleFailed {
        /// Stage that failed, e.g. `connect`
        stage: String,
    },

    /// The loop observed cancellation and stopped
    Stopped,
}

impl MonitorEvent {
    /// Event announcing a pushed mic state
    pub fn mic(active: bool) -> Self {
        if active {
            MonitorEvent::MicActivated
        } else {
            MonitorEvent::MicDeactivated
        }
    }
}

impl std::fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorEvent::MicActivated => write!(f, "MIC_ACTIVATED"),
            MonitorEvent::MicDeactivated => write!(f, "MIC_DEACTIVATED"),
            MonitorEvent::CycleFailed { stage } => write!(f, "CYCLE_FAILED ({})", stage),
            MonitorEvent::Stopped => write!(f, "STOPPED"),
        }
    }
}

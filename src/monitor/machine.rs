//! Cycle phases and mic state tracking
//!
//! A cycle walks Connecting → Authenticating → ResolvingIdentity →
//! QueryingFlags → ComparingState → (PushingState) → Sleeping. Any failure
//! jumps straight to Sleeping and the next cycle starts over with a fresh
//! session.

use crate::hass::Action;

/// ClientQuery variable reporting a muted microphone
pub const INPUT_MUTED_FLAG: &str = "client_input_muted";
/// ClientQuery variable reporting muted speakers
pub const OUTPUT_MUTED_FLAG: &str = "client_output_muted";

/// Phase of the monitoring loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Connecting,
    Authenticating,
    ResolvingIdentity,
    QueryingFlags,
    ComparingState,
    PushingState,
    Sleeping,
    Stopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "Idle"),
            Phase::Connecting => write!(f, "Connecting"),
            Phase::Authenticating => write!(f, "Authenticating"),
            Phase::ResolvingIdentity => write!(f, "ResolvingIdentity"),
            Phase::QueryingFlags => write!(f, "QueryingFlags"),
            Phase::ComparingState => write!(f, "ComparingState"),
            Phase::PushingState => write!(f, "PushingState"),
            Phase::Sleeping => write!(f, "Sleeping"),
            Phase::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Raw mute flags as reported by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuteFlags {
    pub input_muted: String,
    pub output_muted: String,
}

impl MuteFlags {
    /// The mic counts as live only when neither input nor output is muted
    pub fn mic_active(&self) -> bool {
        self.input_muted == "0" && self.output_muted == "0"
    }
}

/// Last mic state known to Home Assistant
///
/// Owned by the loop and threaded through every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicTracker {
    last_known: bool,
}

impl MicTracker {
    pub fn new(last_known: bool) -> Self {
        Self { last_known }
    }

    /// Seed from the entity state read at startup; only `"on"` counts as live
    pub fn seeded(state: &str) -> Self {
        Self::new(state == "on")
    }

    pub fn last_known(&self) -> bool {
        self.last_known
    }

    /// Action to push for `mic_active`, if it differs from the last known state
    pub fn pending(&self, mic_active: bool) -> Option<Action> {
        (mic_active != self.last_known).then(|| Action::for_mic(mic_active))
    }

    /// Record a state that was successfully pushed
    pub fn commit(&mut self, mic_active: bool) {
        self.last_known = mic_active;
    }
}

//! Home Assistant bridge
//!
//! The monitoring loop only needs to read the mirrored entity once at
//! startup and to flip it on or off afterwards.

mod client;

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

pub use client::HassClient;

/// Service called on the `input_boolean` domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    TurnOn,
    TurnOff,
}

impl Action {
    /// Action matching a mic state
    pub fn for_mic(active: bool) -> Self {
        if active {
            Action::TurnOn
        } else {
            Action::TurnOff
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::TurnOn => "turn_on",
            Action::TurnOff => "turn_off",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read and write one external boolean entity
///
/// Implementations do not retry or cache; the caller owns the retry policy.
#[async_trait]
pub trait StateBridge: Send + Sync {
    /// Current state string of the entity, e.g. `"on"`
    async fn get_state(&self) -> Result<String>;

    /// Invoke `action` on the entity
    async fn set_state(&self, action: Action) -> Result<()>;
}

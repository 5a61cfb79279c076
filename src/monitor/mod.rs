//! Monitoring loop
//!
//! Polls the local TeamSpeak client once per interval and mirrors the
//! combined mic state into Home Assistant:
//! - `guard`: per-operation deadline and cancellation
//! - `machine`: cycle phases and the loop-owned mic state
//! - `runner`: the loop itself

mod guard;
mod machine;
mod runner;

#[cfg(test)]
mod tests;

pub use runner::{MonitorLoop, MonitorSettings};

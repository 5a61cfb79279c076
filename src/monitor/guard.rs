//! Deadline and cancellation guard for single protocol operations
//!
//! The guarded future is dropped when the deadline passes or the loop is
//! cancelled. Dropping it cancels any in-flight read or write at its current
//! await point; the session it was driving is then discarded by the caller,
//! so a half-read reply is never seen by a later command.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Run `operation` with a deadline
///
/// Returns `None` when the operation fails, times out or is cancelled. The
/// cause is logged here and never returned to the caller.
pub async fn run_with_deadline<T, F>(
    op: &'static str,
    deadline: Duration,
    cancel: &CancellationToken,
    operation: F,
) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(op, "operation cancelled");
            return None;
        }
        outcome = tokio::time::timeout(deadline, operation) => outcome,
    };

    let error = match outcome {
        Ok(Ok(value)) => return Some(value),
        Ok(Err(e)) => e,
        Err(_) => Error::Timeout {
            op,
            timeout_ms: millis(deadline),
        },
    };

    if cancel.is_cancelled() {
        debug!(op, error = %error, "operation failed during shutdown");
    } else {
        warn!(op, kind = %error.kind(), error = %error, "operation failed");
    }
    None
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

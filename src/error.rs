//! Error taxonomy for the bridge
//!
//! Every failure inside a monitoring cycle is recoverable: the cycle is
//! abandoned, logged and retried. Only configuration errors halt startup.

use std::fmt;

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the protocol session, the Home Assistant bridge and
/// configuration loading
#[derive(Error, Debug)]
pub enum Error {
    /// Stream could not be opened, or the greeting was not recognised
    #[error("connection failed: {0}")]
    Connection(String),

    /// The `auth` command did not end in a success status line
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A reply ended without the value we asked for, or was malformed
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An operation exceeded its deadline
    #[error("operation `{op}` timed out after {timeout_ms}ms")]
    Timeout { op: &'static str, timeout_ms: u64 },

    /// Home Assistant answered with a non-2xx status or an unusable body
    #[error("transport error: {0}")]
    Transport(String),

    /// Missing or invalid startup configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Socket level I/O error on the protocol stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

/// Coarse classification used as a structured log field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Connection,
    Auth,
    Protocol,
    Timeout,
    Transport,
    Configuration,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Connection => write!(f, "connection"),
            FailureKind::Auth => write!(f, "auth"),
            FailureKind::Protocol => write!(f, "protocol"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Transport => write!(f, "transport"),
            FailureKind::Configuration => write!(f, "configuration"),
        }
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Connection(_) | Error::Io(_) => FailureKind::Connection,
            Error::Auth(_) => FailureKind::Auth,
            Error::Protocol(_) => FailureKind::Protocol,
            Error::Timeout { .. } => FailureKind::Timeout,
            Error::Transport(_) => FailureKind::Transport,
            Error::Configuration(_) => FailureKind::Configuration,
        }
    }
}

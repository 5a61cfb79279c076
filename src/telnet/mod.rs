//! ClientQuery protocol client
//!
//! Speaks the line-oriented TeamSpeak 3 ClientQuery protocol:
//! - Endpoint parsing from a `host:port` string
//! - Reply framing (informational lines, terminal status line)
//! - A single authenticated session per monitoring cycle

mod endpoint;
mod protocol;
mod session;

pub use endpoint::Endpoint;
pub use session::{Dialer, Session, TcpDialer};

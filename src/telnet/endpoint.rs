//! Protocol endpoint address

use std::fmt;

use crate::error::{Error, Result};

/// Host and port of the ClientQuery interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse a combined `host:port` address
    ///
    /// Exactly one colon is accepted, the host must be non-empty and the
    /// port must fit in a `u16`.
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = || {
            Error::Configuration(format!(
                "invalid address `{address}`, expected format `hostname:port`"
            ))
        };

        let (host, port) = address.split_once(':').ok_or_else(invalid)?;
        if host.is_empty() || port.contains(':') {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

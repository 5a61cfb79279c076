//! Single ClientQuery session
//!
//! A session owns one buffered byte stream. It is opened by `connect`,
//! authenticated in place, used for a handful of sequential commands and
//! closed exactly once. Dropping a session releases the stream as well, so
//! early returns never leak a connection.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::{Error, Result};

use super::endpoint::Endpoint;
use super::protocol::{find_value, trim_line, Command, StatusLine, GREETING_PREFIX};

/// Opens the byte stream a session runs over
#[async_trait]
pub trait Dialer: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn dial(&self, endpoint: &Endpoint) -> io::Result<Self::Stream>;
}

/// Plain TCP dialer used in production
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, endpoint: &Endpoint) -> io::Result<TcpStream> {
        TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await
    }
}

/// One authenticated command/response session
pub struct Session<S> {
    endpoint: Endpoint,
    stream: Option<BufStream<S>>,
    closed: bool,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create an unconnected session for `endpoint`
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            stream: None,
            closed: false,
        }
    }

    /// Dial the endpoint and validate the greeting line
    pub async fn connect<D>(&mut self, dialer: &D) -> Result<()>
    where
        D: Dialer<Stream = S>,
    {
        if self.closed || self.stream.is_some() {
            return Err(Error::Connection("session already used".into()));
        }

        let stream = dialer.dial(&self.endpoint).await.map_err(|e| {
            Error::Connection(format!("failed to connect to {}: {e}", self.endpoint))
        })?;

        self.attach(stream).await
    }

    /// Adopt an already opened stream and validate the greeting line
    pub async fn attach(&mut self, stream: S) -> Result<()> {
        // Held before validation so a rejected stream is still released by close()
        let stream = self.stream.insert(BufStream::new(stream));

        let greeting = read_line(stream)
            .await
            .map_err(|e| Error::Connection(format!("failed to read greeting: {e}")))?
            .ok_or_else(|| Error::Connection("stream closed before greeting".into()))?;

        if !greeting.starts_with(GREETING_PREFIX) {
            return Err(Error::Connection(format!(
                "unexpected greeting `{greeting}`"
            )));
        }

        debug!(endpoint = %self.endpoint, "connected to client query interface");
        Ok(())
    }

    /// Authenticate with the ClientQuery API key
    pub async fn authenticate(&mut self, api_key: &str) -> Result<()> {
        match self.execute(Command::Auth { api_key }, None).await {
            Ok(_) => Ok(()),
            Err(Error::Protocol(reason)) => Err(Error::Auth(reason)),
            Err(e) => Err(e),
        }
    }

    /// Resolve the client id of the local client
    pub async fn resolve_self(&mut self) -> Result<String> {
        self.execute(Command::WhoAmI, Some("clid"))
            .await?
            .ok_or_else(|| Error::Protocol("`whoami` reply carried no clid".into()))
    }

    /// Read one client variable, e.g. `client_input_muted`
    pub async fn query_client_flag(&mut self, clid: &str, flag: &str) -> Result<String> {
        self.execute(Command::ClientVariable { clid, flag }, Some(flag))
            .await?
            .ok_or_else(|| Error::Protocol(format!("`{flag}` not found in reply")))
    }

    /// Release the stream
    ///
    /// Returns `true` if this call released it. Later calls are no-ops.
    pub async fn close(&mut self) -> bool {
        self.closed = true;
        let Some(mut stream) = self.stream.take() else {
            return false;
        };

        if let Err(e) = stream.shutdown().await {
            debug!(?e, "error shutting down session stream");
        }
        debug!(endpoint = %self.endpoint, "session closed");
        true
    }

    /// Send one command and read its reply up to the status line
    ///
    /// When `key` is given, the value of the last `key=value` token seen on
    /// an informational line is returned. Lines after the status line are
    /// left unread.
    async fn execute(&mut self, command: Command<'_>, key: Option<&str>) -> Result<Option<String>> {
        let name = command.name();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::Connection("session not connected".into()))?;

        stream.write_all(command.to_wire().as_bytes()).await?;
        stream.flush().await?;
        trace!(command = name, "command sent");

        let mut value = None;
        while let Some(line) = read_line(stream).await? {
            if let Some(status) = StatusLine::parse(&line) {
                if !status.is_ok() {
                    return Err(Error::Protocol(format!("`{name}` rejected: {status}")));
                }
                return Ok(value);
            }

            if let Some(found) = key.and_then(|key| find_value(&line, key)) {
                value = Some(found.to_string());
            }
        }

        Err(Error::Protocol(format!(
            "connection closed before `{name}` completed"
        )))
    }
}

/// Read the next non-empty line, or `None` at end of stream
async fn read_line<S>(stream: &mut BufStream<S>) -> io::Result<Option<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = String::new();
    loop {
        buf.clear();
        if stream.read_line(&mut buf).await? == 0 {
            return Ok(None);
        }
        let line = trim_line(&buf);
        if !line.is_empty() {
            return Ok(Some(line.to_string()));
        }
    }
}

//! Protocol connections to launched servers.
//!
//! The launcher and the cluster logic only need a narrow capability:
//! connect to an [`Endpoint`], optionally authenticate, run a command and
//! get its reply back. That capability is the [`Connector`] /
//! [`ServerConnection`] pair; [`RespConnector`] is the real thing over
//! TCP or unix sockets, tests plug in scripted stand-ins.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::BytesMut;
use corral_protocol::{parse_frame, Frame, ProtocolError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::endpoint::Endpoint;

/// Default limit for a connect or a single command round-trip.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur while talking to a server.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("server disconnected")]
    Disconnected,

    /// The server answered with an error reply.
    #[error("{0}")]
    Reply(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The server answered, but not with what the caller expected.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("timed out waiting for the server")]
    Timeout,

    #[error("unix sockets are not supported on this platform")]
    UnsupportedEndpoint,
}

impl ClientError {
    /// The server is still loading its dataset.
    pub fn is_loading(&self) -> bool {
        matches!(self, ClientError::Reply(msg) if msg.starts_with("LOADING"))
    }

    /// The server refused the operation, typically because protected
    /// mode or auth is not settled yet.
    pub fn is_denied(&self) -> bool {
        matches!(self, ClientError::Reply(msg) if msg.starts_with("DENIED"))
    }

    /// Connection-level failure rather than a reply.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Disconnected | ClientError::Timeout
        )
    }
}

/// An open connection that can run commands.
#[allow(async_fn_in_trait)]
pub trait ServerConnection {
    /// Runs one command. Error replies come back as [`ClientError::Reply`].
    async fn execute(&mut self, args: &[&str]) -> Result<Frame, ClientError>;
}

/// Opens connections to server endpoints.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Connection: ServerConnection;

    /// Connects to `endpoint`, authenticating with `password` if given.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        password: Option<&str>,
    ) -> Result<Self::Connection, ClientError>;
}

// --- RESP implementation ---

trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Connects over TCP or unix sockets and speaks RESP.
#[derive(Debug, Clone, Copy)]
pub struct RespConnector {
    timeout: Duration,
}

impl Default for RespConnector {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl RespConnector {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>, ClientError> {
        match endpoint {
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(ClientError::UnsupportedEndpoint),
        }
    }
}

impl Connector for RespConnector {
    type Connection = RespConnection;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        password: Option<&str>,
    ) -> Result<RespConnection, ClientError> {
        let stream = tokio::time::timeout(self.timeout, self.open(endpoint))
            .await
            .map_err(|_| ClientError::Timeout)??;

        let mut conn = RespConnection {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(1024),
            timeout: self.timeout,
        };
        if let Some(password) = password {
            conn.authenticate(password).await?;
        }
        Ok(conn)
    }
}

/// A RESP connection with read/write buffering.
pub struct RespConnection {
    stream: Box<dyn Transport>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    timeout: Duration,
}

impl std::fmt::Debug for RespConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RespConnection")
            .field("buffered", &self.read_buf.len())
            .finish_non_exhaustive()
    }
}

impl RespConnection {
    /// Sends a command and reads the reply frame as-is, error replies
    /// included.
    pub async fn send(&mut self, args: &[&str]) -> Result<Frame, ClientError> {
        tokio::time::timeout(self.timeout, self.round_trip(args))
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    async fn round_trip(&mut self, args: &[&str]) -> Result<Frame, ClientError> {
        self.write_buf.clear();
        Frame::command(args).serialize(&mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        self.read_frame().await
    }

    async fn authenticate(&mut self, password: &str) -> Result<(), ClientError> {
        match self.send(&["AUTH", password]).await? {
            frame if frame.is_ok() => Ok(()),
            Frame::Error(e) => Err(ClientError::AuthFailed(e)),
            other => Err(ClientError::AuthFailed(format!(
                "unexpected response to AUTH: {other:?}"
            ))),
        }
    }

    async fn read_frame(&mut self) -> Result<Frame, ClientError> {
        loop {
            if !self.read_buf.is_empty() {
                if let Some((frame, consumed)) = parse_frame(&self.read_buf)? {
                    let _ = self.read_buf.split_to(consumed);
                    return Ok(frame);
                }
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(ClientError::Disconnected);
            }
        }
    }
}

impl ServerConnection for RespConnection {
    async fn execute(&mut self, args: &[&str]) -> Result<Frame, ClientError> {
        match self.send(args).await? {
            Frame::Error(msg) => Err(ClientError::Reply(msg)),
            frame => Ok(frame),
        }
    }
}

// --- introspection helpers ---

/// Sends PING and checks for PONG.
pub async fn ping<S: ServerConnection>(conn: &mut S) -> Result<(), ClientError> {
    let reply = conn.execute(&["PING"]).await?;
    match reply.as_text() {
        Some(text) if text.eq_ignore_ascii_case("PONG") => Ok(()),
        _ => Err(ClientError::UnexpectedReply(format!("{reply:?}"))),
    }
}

/// Runs `INFO <section>` and parses the `key:value` lines.
pub async fn info_section<S: ServerConnection>(
    conn: &mut S,
    section: &str,
) -> Result<BTreeMap<String, String>, ClientError> {
    let reply = conn.execute(&["INFO", section]).await?;
    text_reply(&reply).map(parse_info)
}

/// Runs `CLUSTER INFO` and parses its fields.
pub async fn cluster_info<S: ServerConnection>(
    conn: &mut S,
) -> Result<BTreeMap<String, String>, ClientError> {
    let reply = conn.execute(&["CLUSTER", "INFO"]).await?;
    text_reply(&reply).map(parse_info)
}

fn text_reply(reply: &Frame) -> Result<&str, ClientError> {
    reply
        .as_text()
        .ok_or_else(|| ClientError::UnexpectedReply(format!("{reply:?}")))
}

/// Parses INFO-style text: `key:value` lines, `#` section headers and
/// blank lines ignored.
pub fn parse_info(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

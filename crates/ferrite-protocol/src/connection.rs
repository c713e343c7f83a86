//! Client connection
//!
//! Buffered request/reply I/O against a RESP server, with a deadline on
//! every round trip and optional RESP3 negotiation on open.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::{ClientError, DecodeError, PipelineError};
use crate::{encode_command, parse_frame_with_limits, Frame, ParserLimits};

/// Default buffer size (4KB)
const DEFAULT_CONNECTION_BUFFER_SIZE: usize = 4 * 1024;

/// Default deadline for connect and round trips
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// RESP protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// RESP2 (no negotiation)
    #[default]
    Resp2,
    /// RESP3 (negotiated with `HELLO 3`)
    Resp3,
}

impl ProtocolVersion {
    /// Create from version number
    pub fn from_version(v: u8) -> Option<Self> {
        match v {
            2 => Some(Self::Resp2),
            3 => Some(Self::Resp3),
            _ => None,
        }
    }

    /// Get version number
    pub fn version_number(&self) -> u8 {
        match self {
            Self::Resp2 => 2,
            Self::Resp3 => 3,
        }
    }

    /// Check if this is RESP3
    pub fn is_resp3(&self) -> bool {
        matches!(self, Self::Resp3)
    }
}

/// How replies are surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Text payloads must be valid UTF-8; anything else is a decode error.
    #[default]
    Decoded,
    /// Payloads are returned as raw bytes.
    Raw,
}

/// Options for [`Connection::open`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Deadline for connecting and for each round trip
    pub timeout: Duration,
    /// Protocol version to speak
    pub protocol: ProtocolVersion,
    /// Reply decoding mode
    pub mode: ResponseMode,
    /// Parser limits applied to replies
    pub limits: ParserLimits,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            protocol: ProtocolVersion::default(),
            mode: ResponseMode::default(),
            limits: ParserLimits::default(),
        }
    }
}

impl ConnectOptions {
    /// Set the round-trip deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the protocol version
    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the reply decoding mode
    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A connection to a RESP server
pub struct Connection {
    /// The TCP stream
    stream: TcpStream,

    /// Read buffer
    read_buf: BytesMut,

    /// Write buffer
    write_buf: BytesMut,

    /// Options this connection was opened with
    options: ConnectOptions,

    /// Remote peer address
    pub peer_addr: Option<SocketAddr>,

    /// Set once a malformed reply has been seen
    desynchronized: bool,
}

impl Connection {
    /// Connect to `addr` and, for RESP3, negotiate the protocol.
    pub async fn open(addr: &str, options: ConnectOptions) -> Result<Self, ClientError> {
        let stream = with_deadline(options.timeout, TcpStream::connect(addr)).await?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr().ok();

        let mut conn = Self {
            stream,
            read_buf: BytesMut::with_capacity(DEFAULT_CONNECTION_BUFFER_SIZE),
            write_buf: BytesMut::with_capacity(DEFAULT_CONNECTION_BUFFER_SIZE),
            options,
            peer_addr,
            desynchronized: false,
        };

        if conn.options.protocol.is_resp3() {
            conn.negotiate().await?;
        }

        debug!(
            addr,
            protocol = conn.options.protocol.version_number(),
            mode = ?conn.options.mode,
            "connection opened"
        );
        Ok(conn)
    }

    /// The protocol version in use
    pub fn protocol(&self) -> ProtocolVersion {
        self.options.protocol
    }

    /// The reply decoding mode in use
    pub fn mode(&self) -> ResponseMode {
        self.options.mode
    }

    async fn negotiate(&mut self) -> Result<(), ClientError> {
        let reply = self.execute(&["HELLO", "3"]).await?;
        if let Some(message) = reply.error_message() {
            return Err(ClientError::Negotiation(message));
        }
        match reply {
            Frame::Map(_) | Frame::Array(Some(_)) => Ok(()),
            other => Err(ClientError::Negotiation(format!(
                "unexpected HELLO reply: {:?}",
                other
            ))),
        }
    }

    /// Send one command and wait for its reply.
    ///
    /// Server error replies come back as `Ok(Frame::Error(..))`; only
    /// transport failures and undecodable replies are `Err`.
    pub async fn execute<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<Frame, ClientError> {
        if self.desynchronized {
            return Err(DecodeError::Desynchronized.into());
        }
        encode_command(args, &mut self.write_buf);
        self.flush().await?;
        self.read_reply().await
    }

    /// Start a pipeline on this connection.
    pub fn pipeline(&mut self) -> Pipeline<'_> {
        Pipeline {
            conn: self,
            queued: 0,
        }
    }

    /// Shut down the write side of the connection.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ClientError> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        trace!(bytes = self.write_buf.len(), "flushing requests");
        let result =
            with_deadline(self.options.timeout, self.stream.write_all(&self.write_buf)).await;
        self.write_buf.clear();
        result
    }

    /// Returns true if a malformed reply has been seen on this connection.
    ///
    /// Every later command then fails with [`DecodeError::Desynchronized`]
    /// without a round trip.
    pub fn is_desynchronized(&self) -> bool {
        self.desynchronized
    }

    /// Read the next reply.
    async fn read_reply(&mut self) -> Result<Frame, ClientError> {
        if self.desynchronized {
            return Err(DecodeError::Desynchronized.into());
        }

        loop {
            match parse_frame_with_limits(&mut self.read_buf, &self.options.limits) {
                Ok(Some(frame)) => return self.check_reply(frame),
                Ok(None) => {
                    // Need more data
                }
                Err(e) => {
                    // A bad byte inside an aggregate leaves the rest of the
                    // aggregate in the stream; nothing after it can be paired
                    // with its command.
                    self.read_buf.clear();
                    self.desynchronized = true;
                    debug!(error = %e, "malformed reply, stream desynchronized");
                    return Err(DecodeError::Malformed(e).into());
                }
            }

            let n = with_deadline(
                self.options.timeout,
                self.stream.read_buf(&mut self.read_buf),
            )
            .await?;

            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }

    fn check_reply(&self, frame: Frame) -> Result<Frame, ClientError> {
        if self.options.mode == ResponseMode::Decoded && !frame.is_valid_utf8() {
            return Err(DecodeError::InvalidUtf8.into());
        }
        Ok(frame)
    }
}

/// A batch of commands written in one go, with replies read in order.
///
/// Dropping a pipeline without executing it discards the queued commands.
pub struct Pipeline<'a> {
    conn: &'a mut Connection,
    queued: usize,
}

impl Pipeline<'_> {
    /// Queue a command.
    pub fn queue<A: AsRef<[u8]>>(&mut self, args: &[A]) -> &mut Self {
        encode_command(args, &mut self.conn.write_buf);
        self.queued += 1;
        self
    }

    /// Number of queued commands
    pub fn len(&self) -> usize {
        self.queued
    }

    /// Returns true if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// Send every queued command and read one reply per command.
    ///
    /// Each slot holds either the reply frame or the decode error for that
    /// reply. Slots after a malformed reply are `Desynchronized`. A
    /// transport failure returns the replies read so far in the error.
    pub async fn execute(self) -> Result<Vec<Result<Frame, DecodeError>>, PipelineError> {
        let queued = self.queued;
        if queued == 0 {
            return Ok(Vec::new());
        }

        self.conn.flush().await?;

        let mut replies = Vec::with_capacity(queued);
        for _ in 0..queued {
            match self.conn.read_reply().await {
                Ok(frame) => replies.push(Ok(frame)),
                Err(ClientError::Decode(e)) => replies.push(Err(e)),
                Err(error) => return Err(PipelineError { replies, error }),
            }
        }
        Ok(replies)
    }
}

impl Drop for Pipeline<'_> {
    fn drop(&mut self) {
        self.conn.write_buf.clear();
    }
}

async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ClientError::Timeout(limit.as_millis() as u64)),
    }
}

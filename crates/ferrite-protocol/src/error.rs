//! Error types for the RESP client.

use std::io;

use thiserror::Error;

use crate::{Frame, ParseError};

/// A reply arrived but could not be turned into a [`Frame`].
///
/// `InvalidUtf8` is scoped to a single reply. After `Malformed` the frame
/// boundaries of the stream are lost, so every later reply on the same
/// connection is `Desynchronized`.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The server sent bytes that do not form a valid RESP frame.
    #[error("malformed reply: {0}")]
    Malformed(ParseError),

    /// The reply contains non-UTF-8 text while the connection is in
    /// decoded mode.
    #[error("reply is not valid UTF-8")]
    InvalidUtf8,

    /// An earlier reply on this connection was malformed, so this one
    /// cannot be located in the stream.
    #[error("reply stream desynchronized after a malformed reply")]
    Desynchronized,
}

impl DecodeError {
    /// Returns true if the replies that follow can no longer be trusted.
    pub fn breaks_stream(&self) -> bool {
        !matches!(self, DecodeError::InvalidUtf8)
    }
}

/// Errors produced by a [`Connection`](crate::Connection).
#[derive(Debug, Error)]
pub enum ClientError {
    /// Underlying socket error (refused, reset, broken pipe, ...)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection setup or a round trip did not finish in time
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// The server closed the connection
    #[error("connection closed by server")]
    ConnectionClosed,

    /// The server rejected the requested protocol version
    #[error("protocol negotiation failed: {0}")]
    Negotiation(String),

    /// A single reply could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl ClientError {
    /// Returns true if the connection can no longer be used.
    pub fn is_transport(&self) -> bool {
        !matches!(self, ClientError::Decode(_))
    }

    /// Returns true if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout(_))
    }
}

/// A pipeline failed at the transport level.
///
/// `replies` holds what was read before the failure, in queue order; the
/// slots after it never got a reply.
#[derive(Debug, Error)]
#[error("pipeline failed after {} replies: {}", .replies.len(), .error)]
pub struct PipelineError {
    /// Replies read before the failure
    pub replies: Vec<Result<Frame, DecodeError>>,
    /// The transport failure
    pub error: ClientError,
}

impl From<ClientError> for PipelineError {
    fn from(error: ClientError) -> Self {
        Self {
            replies: Vec::new(),
            error,
        }
    }
}

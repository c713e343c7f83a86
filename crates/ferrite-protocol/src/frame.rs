//! RESP Frame types
//!
//! This module defines the Frame enum representing every reply type a
//! RESP2/RESP3 server can send back to a client.

use bytes::Bytes;

/// RESP protocol frame types
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    // RESP2 types
    /// Simple string: +OK\r\n
    Simple(Bytes),

    /// Error: -ERR message\r\n
    Error(Bytes),

    /// Integer: :1000\r\n
    Integer(i64),

    /// Bulk string: $5\r\nhello\r\n or $-1\r\n for null
    Bulk(Option<Bytes>),

    /// Array: *2\r\n... or *-1\r\n for null
    Array(Option<Vec<Frame>>),

    // RESP3 types
    /// Null: _\r\n
    Null,

    /// Boolean: #t\r\n or #f\r\n
    Boolean(bool),

    /// Double: ,3.14\r\n
    Double(f64),

    /// Big number: (12345...\r\n
    BigNumber(Bytes),

    /// Bulk error: !<len>\r\n<error>\r\n
    BulkError(Bytes),

    /// Verbatim string: =<len>\r\n<encoding>:<data>\r\n
    VerbatimString {
        /// The encoding type (e.g., "txt", "mkd")
        encoding: Bytes,
        /// The verbatim string data
        data: Bytes,
    },

    /// Map: %<count>\r\n<key><value>...
    ///
    /// Kept as ordered pairs: servers may send any frame as a key.
    Map(Vec<(Frame, Frame)>),

    /// Set: ~<count>\r\n<element>...
    Set(Vec<Frame>),

    /// Push: ><count>\r\n<element>... (server-initiated message)
    Push(Vec<Frame>),
}

impl Frame {
    /// Create a simple string frame
    #[inline]
    pub fn simple(s: impl Into<Bytes>) -> Self {
        Frame::Simple(s.into())
    }

    /// Create an error frame
    #[cold]
    #[inline]
    pub fn error(s: impl Into<Bytes>) -> Self {
        Frame::Error(s.into())
    }

    /// Create an integer frame
    #[inline]
    pub fn integer(n: i64) -> Self {
        Frame::Integer(n)
    }

    /// Create a bulk string frame
    #[inline]
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(Some(data.into()))
    }

    /// Create a null bulk string frame
    #[inline]
    pub fn null() -> Self {
        Frame::Bulk(None)
    }

    /// Create an array frame
    #[inline]
    pub fn array(frames: Vec<Frame>) -> Self {
        Frame::Array(Some(frames))
    }

    /// Check if this frame is an error reply (RESP2 error or RESP3 bulk error)
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_) | Frame::BulkError(_))
    }

    /// The error message carried by an error reply.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Frame::Error(msg) | Frame::BulkError(msg) => {
                Some(String::from_utf8_lossy(msg).into_owned())
            }
            _ => None,
        }
    }

    /// Get the string value if this is a Simple, Bulk or Verbatim frame
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Frame::Simple(b) | Frame::Bulk(Some(b)) => std::str::from_utf8(b).ok(),
            Frame::VerbatimString { data, .. } => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    /// Returns true if every textual payload in this frame (recursively) is
    /// valid UTF-8.
    pub fn is_valid_utf8(&self) -> bool {
        match self {
            Frame::Simple(b)
            | Frame::Error(b)
            | Frame::Bulk(Some(b))
            | Frame::BigNumber(b)
            | Frame::BulkError(b) => std::str::from_utf8(b).is_ok(),
            Frame::VerbatimString { encoding, data } => {
                std::str::from_utf8(encoding).is_ok() && std::str::from_utf8(data).is_ok()
            }
            Frame::Array(Some(items)) | Frame::Set(items) | Frame::Push(items) => {
                items.iter().all(Frame::is_valid_utf8)
            }
            Frame::Map(pairs) => pairs
                .iter()
                .all(|(k, v)| k.is_valid_utf8() && v.is_valid_utf8()),
            Frame::Integer(_)
            | Frame::Bulk(None)
            | Frame::Array(None)
            | Frame::Null
            | Frame::Boolean(_)
            | Frame::Double(_) => true,
        }
    }
}

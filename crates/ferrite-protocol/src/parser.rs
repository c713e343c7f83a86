//! RESP reply parser
//!
//! Streaming parser for RESP2/RESP3 replies. A frame is only consumed from
//! the buffer once it has been parsed completely; a short buffer leaves the
//! input untouched and reports that more data is needed.

use std::io::Cursor;

use bytes::{Buf, Bytes, BytesMut};

use super::Frame;

/// Upper bound on speculative pre-allocation for collection frames.
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// Protocol parser limits to prevent unbounded allocations from a
/// misbehaving server.
#[derive(Debug, Clone)]
pub struct ParserLimits {
    /// Maximum bulk string size in bytes (default: 512MB, matches Redis)
    pub max_bulk_string_size: usize,
    /// Maximum number of elements in an array/set/map/push (default: 1,048,576)
    pub max_array_elements: usize,
    /// Maximum nesting depth for recursive structures (default: 64)
    pub max_nesting_depth: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_bulk_string_size: 512 * 1024 * 1024,
            max_array_elements: 1_048_576,
            max_nesting_depth: 64,
        }
    }
}

/// Parse error types
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Not enough data to parse a complete frame
    Incomplete,

    /// Invalid protocol format
    Invalid(String),

    /// Invalid UTF-8 where the protocol requires text
    InvalidUtf8,

    /// Frame exceeds configured size limits
    FrameTooLarge(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Incomplete => write!(f, "incomplete data"),
            ParseError::Invalid(msg) => write!(f, "invalid protocol: {}", msg),
            ParseError::InvalidUtf8 => write!(f, "invalid UTF-8"),
            ParseError::FrameTooLarge(msg) => write!(f, "frame too large: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

#[cold]
#[inline(never)]
fn invalid_byte_error(byte: u8) -> ParseError {
    ParseError::Invalid(format!("unexpected byte: {:02x}", byte))
}

#[cold]
#[inline(never)]
fn invalid_integer_error(line: &[u8]) -> ParseError {
    ParseError::Invalid(format!(
        "invalid integer: {}",
        String::from_utf8_lossy(line)
    ))
}

#[cold]
#[inline(never)]
fn invalid_double_error(s: &str) -> ParseError {
    ParseError::Invalid(format!("invalid double: {}", s))
}

#[cold]
#[inline(never)]
fn negative_length_error(kind: &str) -> ParseError {
    ParseError::Invalid(format!("negative {} length", kind))
}

#[cold]
#[inline(never)]
fn bulk_string_too_large_error(size: usize, max: usize) -> ParseError {
    ParseError::FrameTooLarge(format!("bulk string size {} exceeds limit {}", size, max))
}

#[cold]
#[inline(never)]
fn collection_too_large_error(kind: &str, count: usize, max: usize) -> ParseError {
    ParseError::FrameTooLarge(format!(
        "{} element count {} exceeds limit {}",
        kind, count, max
    ))
}

#[cold]
#[inline(never)]
fn nesting_too_deep_error(depth: usize, max: usize) -> ParseError {
    ParseError::FrameTooLarge(format!("nesting depth {} exceeds limit {}", depth, max))
}

/// Parse a RESP frame from the buffer
///
/// Returns Ok(Some(frame)) if a complete frame was parsed,
/// Ok(None) if more data is needed, or Err if the data is invalid.
pub fn parse_frame(buf: &mut BytesMut) -> Result<Option<Frame>, ParseError> {
    parse_frame_with_limits(buf, &ParserLimits::default())
}

/// Parse a RESP frame from the buffer with configurable limits.
pub fn parse_frame_with_limits(
    buf: &mut BytesMut,
    limits: &ParserLimits,
) -> Result<Option<Frame>, ParseError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor::new(&buf[..]);
    match parse_value(&mut cursor, limits, 0) {
        Ok(frame) => {
            let consumed = cursor.position() as usize;
            buf.advance(consumed);
            Ok(Some(frame))
        }
        Err(ParseError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Drop buffered bytes up to and including the next CRLF.
///
/// Used to resynchronize after a malformed frame so later replies can still
/// be read. Clears the buffer if no line terminator is present.
pub fn discard_line(buf: &mut BytesMut) {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => buf.advance(pos + 2),
        None => buf.clear(),
    }
}

fn parse_value(
    cursor: &mut Cursor<&[u8]>,
    limits: &ParserLimits,
    depth: usize,
) -> Result<Frame, ParseError> {
    if depth > limits.max_nesting_depth {
        return Err(nesting_too_deep_error(depth, limits.max_nesting_depth));
    }

    match get_byte(cursor)? {
        b'+' => Ok(Frame::Simple(Bytes::copy_from_slice(read_line(cursor)?))),
        b'-' => Ok(Frame::Error(Bytes::copy_from_slice(read_line(cursor)?))),
        b':' => Ok(Frame::Integer(read_decimal(cursor)?)),
        b'$' => match read_blob(cursor, limits, "bulk string", true)? {
            Some(data) => Ok(Frame::Bulk(Some(data))),
            None => Ok(Frame::null()),
        },
        b'*' => match read_elements(cursor, limits, depth, "array")? {
            Some(items) => Ok(Frame::Array(Some(items))),
            None => Ok(Frame::Array(None)),
        },
        // RESP3 types
        b'_' => {
            skip_crlf(cursor)?;
            Ok(Frame::Null)
        }
        b'#' => {
            let line = read_line(cursor)?;
            match line {
                b"t" => Ok(Frame::Boolean(true)),
                b"f" => Ok(Frame::Boolean(false)),
                _ => Err(ParseError::Invalid(format!(
                    "invalid boolean: {}",
                    String::from_utf8_lossy(line)
                ))),
            }
        }
        b',' => {
            let line = read_line(cursor)?;
            let s = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;
            let d = match s {
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                "nan" => f64::NAN,
                _ => s.parse().map_err(|_| invalid_double_error(s))?,
            };
            Ok(Frame::Double(d))
        }
        b'(' => Ok(Frame::BigNumber(Bytes::copy_from_slice(read_line(cursor)?))),
        b'!' => match read_blob(cursor, limits, "bulk error", false)? {
            Some(data) => Ok(Frame::BulkError(data)),
            None => Err(negative_length_error("bulk error")),
        },
        b'=' => {
            let data = match read_blob(cursor, limits, "verbatim string", false)? {
                Some(data) => data,
                None => return Err(negative_length_error("verbatim string")),
            };
            // Format is "txt:actual data"
            if data.len() < 4 || data[3] != b':' {
                return Err(ParseError::Invalid("verbatim string too short".into()));
            }
            Ok(Frame::VerbatimString {
                encoding: data.slice(..3),
                data: data.slice(4..),
            })
        }
        b'%' => {
            let count = match read_count(cursor, limits, "map")? {
                Some(count) => count,
                None => return Ok(Frame::Null),
            };
            let mut pairs = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
            for _ in 0..count {
                let key = parse_value(cursor, limits, depth + 1)?;
                let value = parse_value(cursor, limits, depth + 1)?;
                pairs.push((key, value));
            }
            Ok(Frame::Map(pairs))
        }
        b'~' => match read_elements(cursor, limits, depth, "set")? {
            Some(items) => Ok(Frame::Set(items)),
            None => Ok(Frame::Null),
        },
        b'>' => match read_elements(cursor, limits, depth, "push")? {
            Some(items) => Ok(Frame::Push(items)),
            None => Ok(Frame::Null),
        },
        byte => Err(invalid_byte_error(byte)),
    }
}

/// Read a length-prefixed payload. `Ok(None)` means the null length `-1`
/// (only accepted when `nullable`).
fn read_blob(
    cursor: &mut Cursor<&[u8]>,
    limits: &ParserLimits,
    kind: &str,
    nullable: bool,
) -> Result<Option<Bytes>, ParseError> {
    let len = read_decimal(cursor)?;
    if len == -1 && nullable {
        return Ok(None);
    }
    if len < 0 {
        return Err(negative_length_error(kind));
    }
    let len = len as usize;
    if len > limits.max_bulk_string_size {
        return Err(bulk_string_too_large_error(len, limits.max_bulk_string_size));
    }
    let data = Bytes::copy_from_slice(read_bytes(cursor, len)?);
    skip_crlf(cursor)?;
    Ok(Some(data))
}

/// Read an aggregate element count. `Ok(None)` means the null count `-1`.
fn read_count(
    cursor: &mut Cursor<&[u8]>,
    limits: &ParserLimits,
    kind: &str,
) -> Result<Option<usize>, ParseError> {
    let count = read_decimal(cursor)?;
    if count == -1 {
        return Ok(None);
    }
    if count < -1 {
        return Err(negative_length_error(kind));
    }
    let count = count as usize;
    if count > limits.max_array_elements {
        return Err(collection_too_large_error(
            kind,
            count,
            limits.max_array_elements,
        ));
    }
    Ok(Some(count))
}

fn read_elements(
    cursor: &mut Cursor<&[u8]>,
    limits: &ParserLimits,
    depth: usize,
    kind: &str,
) -> Result<Option<Vec<Frame>>, ParseError> {
    let count = match read_count(cursor, limits, kind)? {
        Some(count) => count,
        None => return Ok(None),
    };
    let mut items = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
    for _ in 0..count {
        items.push(parse_value(cursor, limits, depth + 1)?);
    }
    Ok(Some(items))
}

fn get_byte(cursor: &mut Cursor<&[u8]>) -> Result<u8, ParseError> {
    if !cursor.has_remaining() {
        return Err(ParseError::Incomplete);
    }
    Ok(cursor.get_u8())
}

/// Read until CRLF, returning the line without the terminator.
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ParseError> {
    let start = cursor.position() as usize;
    let data: &'a [u8] = *cursor.get_ref();
    let rest = &data[start..];
    match rest.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => {
            cursor.set_position((start + pos + 2) as u64);
            Ok(&data[start..start + pos])
        }
        None => Err(ParseError::Incomplete),
    }
}

fn read_decimal(cursor: &mut Cursor<&[u8]>) -> Result<i64, ParseError> {
    let line = read_line(cursor)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| invalid_integer_error(line))
}

fn read_bytes<'a>(cursor: &mut Cursor<&'a [u8]>, n: usize) -> Result<&'a [u8], ParseError> {
    let start = cursor.position() as usize;
    let data: &'a [u8] = *cursor.get_ref();
    if data.len() - start < n {
        return Err(ParseError::Incomplete);
    }
    cursor.set_position((start + n) as u64);
    Ok(&data[start..start + n])
}

fn skip_crlf(cursor: &mut Cursor<&[u8]>) -> Result<(), ParseError> {
    let crlf = read_bytes(cursor, 2)?;
    if crlf != b"\r\n" {
        return Err(ParseError::Invalid("expected CRLF".to_string()));
    }
    Ok(())
}

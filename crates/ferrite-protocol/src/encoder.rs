//! RESP encoder
//!
//! Requests are always sent as arrays of bulk strings. Full frame encoding
//! is kept for servers and test doubles that need to produce replies.

use bytes::{BufMut, BytesMut};

use super::Frame;

/// Encode a command (`args[0]` is the verb) as a RESP array of bulk strings.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], buf: &mut BytesMut) {
    buf.put_u8(b'*');
    buf.put_slice(args.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        buf.put_u8(b'$');
        buf.put_slice(arg.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(arg);
        buf.put_slice(b"\r\n");
    }
}

/// Encode a frame into the buffer
pub fn encode_frame(frame: &Frame, buf: &mut BytesMut) {
    match frame {
        Frame::Simple(s) => put_line(buf, b'+', s),
        Frame::Error(s) => put_line(buf, b'-', s),
        Frame::Integer(n) => put_line(buf, b':', n.to_string().as_bytes()),
        Frame::Bulk(None) => buf.put_slice(b"$-1\r\n"),
        Frame::Bulk(Some(data)) => put_blob(buf, b'$', data),
        Frame::Array(None) => buf.put_slice(b"*-1\r\n"),
        Frame::Array(Some(frames)) => put_aggregate(buf, b'*', frames),
        Frame::Null => buf.put_slice(b"_\r\n"),
        Frame::Boolean(b) => buf.put_slice(if *b { b"#t\r\n" } else { b"#f\r\n" }),
        Frame::Double(d) => {
            let text = if d.is_nan() {
                "nan".to_string()
            } else if d.is_infinite() {
                (if *d > 0.0 { "inf" } else { "-inf" }).to_string()
            } else {
                d.to_string()
            };
            put_line(buf, b',', text.as_bytes());
        }
        Frame::BigNumber(n) => put_line(buf, b'(', n),
        Frame::BulkError(s) => put_blob(buf, b'!', s),
        Frame::VerbatimString { encoding, data } => {
            let mut payload = Vec::with_capacity(encoding.len() + 1 + data.len());
            payload.extend_from_slice(encoding);
            payload.push(b':');
            payload.extend_from_slice(data);
            put_blob(buf, b'=', &payload);
        }
        Frame::Map(pairs) => {
            put_line(buf, b'%', pairs.len().to_string().as_bytes());
            for (key, value) in pairs {
                encode_frame(key, buf);
                encode_frame(value, buf);
            }
        }
        Frame::Set(elements) => put_aggregate(buf, b'~', elements),
        Frame::Push(elements) => put_aggregate(buf, b'>', elements),
    }
}

fn put_line(buf: &mut BytesMut, prefix: u8, line: &[u8]) {
    buf.put_u8(prefix);
    buf.put_slice(line);
    buf.put_slice(b"\r\n");
}

fn put_blob(buf: &mut BytesMut, prefix: u8, data: &[u8]) {
    put_line(buf, prefix, data.len().to_string().as_bytes());
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}

fn put_aggregate(buf: &mut BytesMut, prefix: u8, frames: &[Frame]) {
    put_line(buf, prefix, frames.len().to_string().as_bytes());
    for frame in frames {
        encode_frame(frame, buf);
    }
}

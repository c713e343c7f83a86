#![no_main]

use bytes::BytesMut;
use ferrite_protocol::{discard_line, parse_frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Drain the buffer the way the client does: parse frames until more
    // input is needed, skipping a line after every parse error.
    let mut buf = BytesMut::from(data);
    loop {
        let before = buf.len();
        match parse_frame(&mut buf) {
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => discard_line(&mut buf),
        }
        if buf.is_empty() || buf.len() == before {
            break;
        }
    }
});

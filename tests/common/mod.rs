//! Shared test utilities for ferrite-fuzzer integration tests.
//!
//! Import via `mod common;` in integration test files:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use ferrite_fuzzer::config::{FuzzerConfig, PacingConfig};
use ferrite_protocol::{discard_line, encode_frame, parse_frame, Frame};

// ============================================================================
// Mock server
// ============================================================================

/// A minimal in-process RESP server.
///
/// Answers `PING`, `ECHO`, `HELLO`, `SET`, `GET`, `DEL`, `INFO` and `TIME`,
/// rejects everything else with `ERR unknown command`. Every received
/// command is recorded.
pub struct MockServer {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    accept: JoinHandle<()>,
}

#[derive(Default)]
struct MockState {
    received: Mutex<Vec<Vec<Bytes>>>,
    store: Mutex<HashMap<Bytes, Bytes>>,
    mute_echo: AtomicBool,
}

#[allow(dead_code)]
impl MockServer {
    /// Bind to a random local port and start accepting.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind to random port");
        let addr = listener.local_addr().expect("should have local addr");
        let state = Arc::new(MockState::default());

        let accept_state = state.clone();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, accept_state.clone()));
            }
        });

        Self {
            addr,
            state,
            accept,
        }
    }

    /// `host:port` of the server
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Every command received so far, across all connections
    pub fn received(&self) -> Vec<Vec<Bytes>> {
        self.state.received.lock().clone()
    }

    /// Verbs received so far, as strings
    pub fn verbs(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|args| args.first())
            .map(|verb| String::from_utf8_lossy(verb).into_owned())
            .collect()
    }

    /// Make `ECHO` return the wrong payload, failing every liveness check.
    pub fn mute_echo(&self) {
        self.state.mute_echo.store(true, Ordering::SeqCst);
    }

    /// Stop accepting connections; new connects are refused.
    pub async fn shutdown(self) {
        self.accept.abort();
        let _ = self.accept.await;
    }
}

async fn serve(mut stream: TcpStream, state: Arc<MockState>) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut out = BytesMut::new();

    loop {
        loop {
            match parse_frame(&mut buf) {
                Ok(Some(frame)) => {
                    let args = command_args(frame);
                    let reply = respond(&state, &args);
                    state.received.lock().push(args);
                    encode_frame(&reply, &mut out);
                }
                Ok(None) => break,
                Err(_) => {
                    discard_line(&mut buf);
                    encode_frame(&Frame::error("ERR Protocol error"), &mut out);
                }
            }
        }

        if !out.is_empty() {
            if stream.write_all(&out).await.is_err() {
                return;
            }
            out.clear();
        }

        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn command_args(frame: Frame) -> Vec<Bytes> {
    match frame {
        Frame::Array(Some(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Frame::Bulk(Some(b)) | Frame::Simple(b) => Some(b),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn respond(state: &MockState, args: &[Bytes]) -> Frame {
    let Some(verb) = args.first() else {
        return Frame::error("ERR empty command");
    };

    match verb.to_ascii_uppercase().as_slice() {
        b"PING" => match args.get(1) {
            Some(msg) => Frame::bulk(msg.clone()),
            None => Frame::simple("PONG"),
        },
        b"ECHO" if args.len() == 2 => {
            if state.mute_echo.load(Ordering::SeqCst) {
                Frame::bulk("muted")
            } else {
                Frame::bulk(args[1].clone())
            }
        }
        b"HELLO" => Frame::Map(vec![
            (Frame::simple("server"), Frame::simple("mock")),
            (Frame::simple("proto"), Frame::integer(3)),
        ]),
        b"SET" if args.len() >= 3 => {
            state.store.lock().insert(args[1].clone(), args[2].clone());
            Frame::simple("OK")
        }
        b"GET" if args.len() == 2 => match state.store.lock().get(&args[1]) {
            Some(value) => Frame::bulk(value.clone()),
            None => Frame::null(),
        },
        b"DEL" if args.len() >= 2 => {
            let mut store = state.store.lock();
            let removed = args[1..].iter().filter(|k| store.remove(*k).is_some()).count();
            Frame::integer(removed as i64)
        }
        b"INFO" => Frame::bulk("# Server\r\nredis_version:7.2.0\r\n"),
        b"TIME" => Frame::array(vec![Frame::bulk("1700000000"), Frame::bulk("0")]),
        _ => Frame::error(format!(
            "ERR unknown command '{}'",
            String::from_utf8_lossy(verb)
        )),
    }
}

// ============================================================================
// Run helpers
// ============================================================================

/// Write a corpus file with one command per line.
#[allow(dead_code)]
pub fn write_corpus(dir: &tempfile::TempDir, lines: &[&str]) -> PathBuf {
    let path = dir.path().join("commands.txt");
    std::fs::write(&path, lines.join("\n")).expect("should write corpus");
    path
}

/// Fuzzer configuration for a mock server: no pacing, short deadlines.
#[allow(dead_code)]
pub fn test_config(server: &MockServer) -> FuzzerConfig {
    let mut config = FuzzerConfig::default();
    config.target.host = server.addr.ip().to_string();
    config.target.port = server.addr.port();
    config.pacing = PacingConfig {
        min_delay_ms: 0,
        max_delay_ms: 0,
    };
    config.timeouts.batch_ms = 1000;
    config.timeouts.probe_ms = 500;
    config.timeouts.preflight_ms = 500;
    config
}

/// Poll until `cond` holds. Panics after ~2.5 seconds.
#[allow(dead_code)]
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..50 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met within 2.5 seconds");
}

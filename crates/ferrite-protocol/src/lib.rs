//! # ferrite-protocol
//!
//! Client side of the Redis Serialization Protocol (RESP2 and RESP3):
//! frame types, a streaming reply parser, a command encoder and an async
//! TCP connection with pipelining.
//!
//! ```no_run
//! use ferrite_protocol::{ConnectOptions, Connection};
//!
//! # async fn demo() -> Result<(), ferrite_protocol::ClientError> {
//! let mut conn = Connection::open("127.0.0.1:6379", ConnectOptions::default()).await?;
//! let reply = conn.execute(&["PING"]).await?;
//! assert_eq!(reply.as_str(), Some("PONG"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod connection;
mod encoder;
mod error;
mod frame;
mod parser;

pub use connection::{ConnectOptions, Connection, Pipeline, ProtocolVersion, ResponseMode};
pub use encoder::{encode_command, encode_frame};
pub use error::{ClientError, DecodeError, PipelineError};
pub use frame::Frame;
pub use parser::{discard_line, parse_frame, parse_frame_with_limits, ParseError, ParserLimits};

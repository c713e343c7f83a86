//! Transport seam between the execution driver and the network.
//!
//! The driver only talks to [`Connector`] and [`Session`]; production code
//! plugs in [`TcpConnector`], tests plug in scripted sessions.

use std::time::Duration;

use bytes::Bytes;

use ferrite_protocol::{
    ClientError, ConnectOptions, Connection, DecodeError, Frame, PipelineError, ProtocolVersion,
    ResponseMode,
};

/// Result of a pipelined exchange: one entry per queued command.
pub type PipelineReplies = Vec<Result<Frame, DecodeError>>;

/// Opens sessions to the target server
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Open a session. `timeout` bounds setup and every later round trip.
    async fn connect(
        &self,
        mode: ResponseMode,
        timeout: Duration,
    ) -> Result<Box<dyn Session>, ClientError>;

    /// Human-readable target, for logs
    fn target(&self) -> String;
}

/// An open connection to the target server
#[async_trait::async_trait]
pub trait Session: Send {
    /// Send one command and wait for its reply
    async fn execute(&mut self, args: &[Bytes]) -> Result<Frame, ClientError>;

    /// Send every command in one write, then read one reply per command.
    /// On a transport failure the error carries the replies read so far.
    async fn pipeline(&mut self, commands: &[Vec<Bytes>]) -> Result<PipelineReplies, PipelineError>;

    /// Close the session; errors are ignored
    async fn close(self: Box<Self>);
}

/// Connects over TCP with [`ferrite_protocol::Connection`].
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    protocol: ProtocolVersion,
}

impl TcpConnector {
    /// Create a connector for `address` (`host:port`)
    pub fn new(address: impl Into<String>, protocol: ProtocolVersion) -> Self {
        Self {
            address: address.into(),
            protocol,
        }
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        mode: ResponseMode,
        timeout: Duration,
    ) -> Result<Box<dyn Session>, ClientError> {
        let options = ConnectOptions::default()
            .with_timeout(timeout)
            .with_protocol(self.protocol)
            .with_mode(mode);
        let conn = Connection::open(&self.address, options).await?;
        Ok(Box::new(TcpSession { conn }))
    }

    fn target(&self) -> String {
        self.address.clone()
    }
}

struct TcpSession {
    conn: Connection,
}

#[async_trait::async_trait]
impl Session for TcpSession {
    async fn execute(&mut self, args: &[Bytes]) -> Result<Frame, ClientError> {
        self.conn.execute(args).await
    }

    async fn pipeline(&mut self, commands: &[Vec<Bytes>]) -> Result<PipelineReplies, PipelineError> {
        let mut pipeline = self.conn.pipeline();
        for args in commands {
            pipeline.queue(args.as_slice());
        }
        pipeline.execute().await
    }

    async fn close(self: Box<Self>) {
        let _ = self.conn.close().await;
    }
}

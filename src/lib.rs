//! # ferrite-fuzzer
//!
//! A protocol-level command fuzzer for Ferrite and other RESP servers.
//!
//! Each run executes a bounded number of batches. A batch draws commands
//! from a line-oriented corpus, optionally mutates them, sends them to the
//! target (one at a time or pipelined) and checks that the server still
//! echoes a liveness token. A resilience controller tracks consecutive
//! failures and halts the run when the server stops responding.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`corpus`] | Command corpus and bounded-retry sampling |
//! | [`mutation`] | Byte-level mutation strategies |
//! | [`batch`] | Batch assembly and liveness probes |
//! | [`executor`] | Sequential and pipelined batch execution |
//! | [`controller`] | Resilience state machine and run loop |
//! | [`report`] | Outcome sinks and log files |
//! | [`transport`] | Connection seam over `ferrite-protocol` |
//!
//! ## Example
//!
//! ```no_run
//! use ferrite_fuzzer::batch::{BatchBuilder, ExecutionMode};
//! use ferrite_fuzzer::config::FuzzerConfig;
//! use ferrite_fuzzer::controller::{Controller, RunSettings};
//! use ferrite_fuzzer::corpus::{MemoryCorpus, Sampler};
//! use ferrite_fuzzer::executor::Executor;
//! use ferrite_fuzzer::report::CollectingSink;
//! use ferrite_fuzzer::transport::TcpConnector;
//! use ferrite_protocol::ProtocolVersion;
//! use rand::SeedableRng;
//!
//! # async fn example() -> ferrite_fuzzer::Result<()> {
//! let config = FuzzerConfig::default();
//! let connector = TcpConnector::new(config.target.address(), ProtocolVersion::Resp2);
//! let executor = Executor::new(connector, config.timeouts.batch(), config.pacing);
//! let controller = Controller::new(
//!     executor,
//!     RunSettings {
//!         batches: 10,
//!         max_batch_size: config.run.max_batch_size,
//!         resilience: config.resilience,
//!         probe_timeout: config.timeouts.probe(),
//!         preflight_timeout: config.timeouts.preflight(),
//!         verbose: false,
//!     },
//! );
//! controller.preflight().await?;
//!
//! let corpus = MemoryCorpus::new(["SET key value", "GET key"]);
//! let builder = BatchBuilder::new(&corpus, Sampler::default(), true, ExecutionMode::Sequential);
//! let sink = CollectingSink::new();
//! let (_tx, mut shutdown) = tokio::sync::broadcast::channel(1);
//! let mut rng = rand::rngs::StdRng::from_entropy();
//!
//! let summary = controller.run(&builder, &sink, &mut rng, &mut shutdown).await;
//! println!("{} batches, {:.1}% failed", summary.batches_attempted, summary.failure_rate);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod batch;
pub mod config;
pub mod controller;
pub mod corpus;
pub mod error;
pub mod executor;
pub mod mutation;
pub mod report;
pub mod transport;

pub use error::{FuzzerError, Result};

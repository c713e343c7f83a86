//! Batch assembly
//!
//! A batch is a numbered group of commands plus the liveness probe that
//! decides whether the server survived them.

use std::fmt;

use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};

use ferrite_protocol::Frame;

use crate::corpus::{Corpus, Sampler};
use crate::mutation::{mutate, MutatedCommand};

/// Prefix of the liveness token echoed back by the server
pub const LIVENESS_PREFIX: &str = "ALIVE_CHECK_";

/// Default upper bound for the random batch size
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// How a batch is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One command at a time on a single connection
    #[default]
    Sequential,
    /// All commands written at once, replies read afterwards
    Pipelined,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => f.write_str("sequential"),
            ExecutionMode::Pipelined => f.write_str("pipelined"),
        }
    }
}

/// `ECHO ALIVE_CHECK_<n>` for batch `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessProbe {
    token: String,
}

impl LivenessProbe {
    /// The probe for a batch
    pub fn new(batch_number: u64) -> Self {
        Self {
            token: format!("{}{}", LIVENESS_PREFIX, batch_number),
        }
    }

    /// The token the server must echo back
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Protocol arguments of the probe command
    pub fn args(&self) -> Vec<Bytes> {
        vec![
            Bytes::from_static(b"ECHO"),
            Bytes::copy_from_slice(self.token.as_bytes()),
        ]
    }

    /// The probe as a command line, for logs
    pub fn command_line(&self) -> String {
        format!("ECHO {}", self.token)
    }

    /// The probe passes only on an exact echo of the token.
    pub fn matches(&self, reply: &Frame) -> bool {
        reply.as_str() == Some(self.token.as_str())
    }
}

/// One unit of dispatch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Batch number, starting at 1
    pub number: u64,
    /// Dispatch mode
    pub mode: ExecutionMode,
    /// Commands in send order
    pub commands: Vec<MutatedCommand>,
    /// The batch's liveness probe
    pub probe: LivenessProbe,
}

/// Draws commands from a corpus and mutates them into batches.
pub struct BatchBuilder<'a, C: Corpus + ?Sized> {
    corpus: &'a C,
    sampler: Sampler,
    fuzz: bool,
    mode: ExecutionMode,
}

impl<'a, C: Corpus + ?Sized> BatchBuilder<'a, C> {
    /// Create a builder
    pub fn new(corpus: &'a C, sampler: Sampler, fuzz: bool, mode: ExecutionMode) -> Self {
        Self {
            corpus,
            sampler,
            fuzz,
            mode,
        }
    }

    /// Dispatch mode of built batches
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Whether commands are mutated
    pub fn fuzz(&self) -> bool {
        self.fuzz
    }

    /// Build batch `number` with `size` commands.
    pub fn build<R: Rng + ?Sized>(&self, number: u64, size: usize, rng: &mut R) -> Batch {
        let commands = (0..size)
            .map(|_| {
                let raw = self.sampler.sample(self.corpus, rng);
                mutate(&raw, self.fuzz, rng)
            })
            .collect();

        Batch {
            number,
            mode: self.mode,
            commands,
            probe: LivenessProbe::new(number),
        }
    }
}

/// Batch size drawn uniformly from `[1, max]`.
pub fn random_size<R: Rng + ?Sized>(rng: &mut R, max: usize) -> usize {
    rng.gen_range(1..=max.max(1))
}

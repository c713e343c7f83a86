//! Error types for ferrite-fuzzer
//!
//! Only startup and reporting problems surface as errors. Everything that
//! happens while talking to the target server is recorded in a
//! [`BatchOutcome`](crate::executor::BatchOutcome) instead.

use std::io;
use thiserror::Error;

use ferrite_protocol::ClientError;

/// Main error type for the fuzzer
#[derive(Error, Debug)]
pub enum FuzzerError {
    /// Configuration parsing or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The command corpus is missing, unreadable or empty
    #[error("Corpus error: {0}")]
    Corpus(String),

    /// Log files could not be created or written
    #[error("Report error: {0}")]
    Report(String),

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The target server could not be reached
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// The startup connectivity check failed
    #[error("Cannot reach target server: {0}")]
    Preflight(String),
}

/// Result type alias for fuzzer operations
pub type Result<T> = std::result::Result<T, FuzzerError>;

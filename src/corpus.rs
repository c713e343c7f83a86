//! Command corpus and sampling
//!
//! A corpus is a line-oriented list of commands. The sampler picks one line
//! uniformly at random per call and re-reads the corpus every time, so the
//! file may be edited, truncated or replaced while a run is in progress.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{FuzzerError, Result};

/// Default number of read attempts per sample
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Command returned when sampling fails
pub const DEFAULT_FALLBACK: &str = "PING";

/// An unmodified corpus entry with surrounding whitespace trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand(String);

impl RawCommand {
    /// Create a command from a corpus line
    pub fn new(line: impl AsRef<str>) -> Self {
        Self(line.as_ref().trim().to_string())
    }

    /// The command text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The command bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Returns true if the command is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RawCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A source of command lines.
///
/// Implementations must re-derive their contents on every call; callers
/// never cache the line count.
pub trait Corpus: Send + Sync {
    /// Current number of lines
    fn line_count(&self) -> io::Result<usize>;

    /// The line at `index`, or `None` if the corpus no longer has it
    fn line_at(&self, index: usize) -> io::Result<Option<String>>;
}

/// A corpus backed by a file on disk.
#[derive(Debug, Clone)]
pub struct FileCorpus {
    path: PathBuf,
}

impl FileCorpus {
    /// Open a corpus file, checking that it exists, is readable and has at
    /// least one line.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let metadata = fs::metadata(path).map_err(|e| {
            FuzzerError::Corpus(format!("Commands file {} not found: {}", path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(FuzzerError::Corpus(format!(
                "Commands file {} is not a regular file",
                path.display()
            )));
        }

        let corpus = Self {
            path: path.to_path_buf(),
        };
        let count = corpus.line_count().map_err(|e| {
            FuzzerError::Corpus(format!(
                "Commands file {} is not readable: {}",
                path.display(),
                e
            ))
        })?;
        if count == 0 {
            return Err(FuzzerError::Corpus(format!(
                "Commands file {} is empty",
                path.display()
            )));
        }

        Ok(corpus)
    }

    /// Path of the corpus file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Corpus for FileCorpus {
    fn line_count(&self) -> io::Result<usize> {
        let contents = fs::read(&self.path)?;
        let count = lines(&contents).count();
        Ok(count)
    }

    fn line_at(&self, index: usize) -> io::Result<Option<String>> {
        let contents = fs::read(&self.path)?;
        let line = lines(&contents)
            .nth(index)
            .map(|line| String::from_utf8_lossy(line).into_owned());
        Ok(line)
    }
}

/// Split file contents into lines; a trailing newline does not start a new
/// line.
fn lines(contents: &[u8]) -> impl Iterator<Item = &[u8]> {
    let body = contents.strip_suffix(b"\n").unwrap_or(contents);
    let empty = contents.is_empty();
    body.split(|&b| b == b'\n').filter(move |_| !empty)
}

/// An in-memory corpus whose contents can be swapped at runtime.
#[derive(Debug, Default)]
pub struct MemoryCorpus {
    lines: RwLock<Vec<String>>,
}

impl MemoryCorpus {
    /// Create a corpus from lines
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: RwLock::new(lines.into_iter().map(Into::into).collect()),
        }
    }

    /// Replace every line
    pub fn replace<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.lines.write() = lines.into_iter().map(Into::into).collect();
    }
}

impl Corpus for MemoryCorpus {
    fn line_count(&self) -> io::Result<usize> {
        Ok(self.lines.read().len())
    }

    fn line_at(&self, index: usize) -> io::Result<Option<String>> {
        Ok(self.lines.read().get(index).cloned())
    }
}

/// Draws random commands from a corpus with bounded retries.
#[derive(Debug, Clone)]
pub struct Sampler {
    max_attempts: usize,
    fallback: RawCommand,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_FALLBACK)
    }
}

impl Sampler {
    /// Create a sampler
    pub fn new(max_attempts: usize, fallback: impl AsRef<str>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            fallback: RawCommand::new(fallback),
        }
    }

    /// Pick one command.
    ///
    /// An unreadable index, an I/O error or a blank line costs one attempt.
    /// Once every attempt is spent the fallback command is returned.
    pub fn sample<C, R>(&self, corpus: &C, rng: &mut R) -> RawCommand
    where
        C: Corpus + ?Sized,
        R: Rng + ?Sized,
    {
        for attempt in 1..=self.max_attempts {
            let count = match corpus.line_count() {
                Ok(0) => {
                    debug!(attempt, "corpus is empty");
                    continue;
                }
                Ok(count) => count,
                Err(e) => {
                    debug!(attempt, error = %e, "failed to read corpus");
                    continue;
                }
            };

            let index = rng.gen_range(0..count);
            match corpus.line_at(index) {
                Ok(Some(line)) => {
                    let command = RawCommand::new(line);
                    if !command.is_empty() {
                        return command;
                    }
                    debug!(attempt, index, "skipping blank corpus line");
                }
                Ok(None) => debug!(attempt, index, "corpus shrank below sampled index"),
                Err(e) => debug!(attempt, index, error = %e, "failed to read corpus line"),
            }
        }

        warn!(
            attempts = self.max_attempts,
            fallback = %self.fallback,
            "corpus sampling failed, using fallback command"
        );
        self.fallback.clone()
    }
}

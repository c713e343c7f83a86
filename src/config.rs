//! Configuration module for ferrite-fuzzer
//!
//! This module handles loading and parsing configuration from TOML files,
//! with sensible defaults for all optional values. Command-line flags are
//! applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ferrite_protocol::ProtocolVersion;

use crate::batch::ExecutionMode;
use crate::error::{FuzzerError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzerConfig {
    /// Target server
    pub target: TargetConfig,

    /// Run shape
    pub run: RunConfig,

    /// Command corpus
    pub corpus: CorpusConfig,

    /// Network deadlines
    pub timeouts: TimeoutConfig,

    /// Halt thresholds
    pub resilience: ResilienceConfig,

    /// Delay between batches
    pub pacing: PacingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl FuzzerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FuzzerError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| FuzzerError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.target.host.is_empty() {
            return Err(FuzzerError::Config("Target host cannot be empty".to_string()));
        }

        if self.target.port == 0 {
            return Err(FuzzerError::Config("Port cannot be 0".to_string()));
        }

        self.target.protocol_version()?;

        if self.run.batches == 0 {
            return Err(FuzzerError::Config(
                "Number of batches must be at least 1".to_string(),
            ));
        }

        if self.run.max_batch_size == 0 {
            return Err(FuzzerError::Config(
                "Max batch size must be at least 1".to_string(),
            ));
        }

        if self.corpus.max_attempts == 0 {
            return Err(FuzzerError::Config(
                "Corpus max_attempts must be at least 1".to_string(),
            ));
        }

        if self.corpus.fallback.trim().is_empty() {
            return Err(FuzzerError::Config(
                "Corpus fallback command cannot be empty".to_string(),
            ));
        }

        if self.timeouts.batch_ms == 0
            || self.timeouts.probe_ms == 0
            || self.timeouts.preflight_ms == 0
        {
            return Err(FuzzerError::Config("Timeouts cannot be 0".to_string()));
        }

        if self.resilience.liveness_failure_limit == 0
            || self.resilience.connectivity_check_after == 0
        {
            return Err(FuzzerError::Config(
                "Resilience thresholds must be at least 1".to_string(),
            ));
        }

        if self.pacing.min_delay_ms > self.pacing.max_delay_ms {
            return Err(FuzzerError::Config(format!(
                "pacing.min_delay_ms ({}) exceeds pacing.max_delay_ms ({})",
                self.pacing.min_delay_ms, self.pacing.max_delay_ms
            )));
        }

        Ok(())
    }

    /// Apply a single `key=value` override (as given to `--set`).
    pub fn apply_override(&mut self, assignment: &str) -> Result<()> {
        let (key, value) = assignment.split_once('=').ok_or_else(|| {
            FuzzerError::Config(format!(
                "Invalid config override '{}': expected key=value format",
                assignment
            ))
        })?;

        match key {
            "target.host" => self.target.host = value.to_string(),
            "target.port" => self.target.port = parse_value(key, value)?,
            "target.protocol" => self.target.protocol = parse_value(key, value)?,
            "run.batches" => self.run.batches = parse_value(key, value)?,
            "run.fuzz" => self.run.fuzz = parse_value(key, value)?,
            "run.mode" => {
                self.run.mode = match value {
                    "sequential" => ExecutionMode::Sequential,
                    "pipelined" => ExecutionMode::Pipelined,
                    _ => {
                        return Err(FuzzerError::Config(format!(
                            "Invalid run.mode value: {} (expected sequential or pipelined)",
                            value
                        )))
                    }
                }
            }
            "run.max_batch_size" => self.run.max_batch_size = parse_value(key, value)?,
            "corpus.path" => self.corpus.path = Some(PathBuf::from(value)),
            "corpus.max_attempts" => self.corpus.max_attempts = parse_value(key, value)?,
            "corpus.fallback" => self.corpus.fallback = value.to_string(),
            "timeouts.batch_ms" => self.timeouts.batch_ms = parse_value(key, value)?,
            "timeouts.probe_ms" => self.timeouts.probe_ms = parse_value(key, value)?,
            "timeouts.preflight_ms" => self.timeouts.preflight_ms = parse_value(key, value)?,
            "resilience.liveness_failure_limit" => {
                self.resilience.liveness_failure_limit = parse_value(key, value)?
            }
            "resilience.connectivity_check_after" => {
                self.resilience.connectivity_check_after = parse_value(key, value)?
            }
            "pacing.min_delay_ms" => self.pacing.min_delay_ms = parse_value(key, value)?,
            "pacing.max_delay_ms" => self.pacing.max_delay_ms = parse_value(key, value)?,
            "logging.level" => self.logging.level = value.to_string(),
            "logging.format" => {
                self.logging.format = match value {
                    "pretty" => LogFormat::Pretty,
                    "json" => LogFormat::Json,
                    _ => {
                        return Err(FuzzerError::Config(format!(
                            "Invalid logging.format value: {}",
                            value
                        )))
                    }
                }
            }
            "logging.dir" => self.logging.dir = Some(PathBuf::from(value)),
            _ => {
                return Err(FuzzerError::Config(format!("Unknown config key: {}", key)));
            }
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| FuzzerError::Config(format!("Invalid value for {}: {}", key, value)))
}

/// Target server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Host name or IP address
    pub host: String,

    /// TCP port
    pub port: u16,

    /// RESP protocol version (2 or 3)
    pub protocol: u8,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            protocol: 2,
        }
    }
}

impl TargetConfig {
    /// Parse a `HOST:PORT` pair.
    pub fn parse_address(address: &str) -> Result<(String, u16)> {
        let (host, port) = address.rsplit_once(':').ok_or_else(|| {
            FuzzerError::Config(format!(
                "Invalid target '{}': expected HOST:PORT",
                address
            ))
        })?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(FuzzerError::Config(format!(
                "Invalid target '{}': host is empty",
                address
            )));
        }

        let port: u16 = port.parse().map_err(|_| {
            FuzzerError::Config(format!(
                "Invalid port '{}': must be between 1 and 65535",
                port
            ))
        })?;
        if port == 0 {
            return Err(FuzzerError::Config(
                "Invalid port '0': must be between 1 and 65535".to_string(),
            ));
        }

        Ok((host.to_string(), port))
    }

    /// The `host:port` string used to connect.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The configured protocol as a [`ProtocolVersion`].
    pub fn protocol_version(&self) -> Result<ProtocolVersion> {
        ProtocolVersion::from_version(self.protocol).ok_or_else(|| {
            FuzzerError::Config(format!(
                "Unsupported protocol version {} (expected 2 or 3)",
                self.protocol
            ))
        })
    }
}

/// Run shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of batches to run
    pub batches: u64,

    /// Whether commands are mutated before sending
    pub fuzz: bool,

    /// Sequential or pipelined dispatch
    pub mode: ExecutionMode,

    /// Upper bound for the random per-batch command count
    pub max_batch_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batches: 100,
            fuzz: false,
            mode: ExecutionMode::Sequential,
            max_batch_size: 10,
        }
    }
}

/// Command corpus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Line-oriented file of commands
    pub path: Option<PathBuf>,

    /// Read attempts per sample before falling back
    pub max_attempts: usize,

    /// Command used when sampling fails
    pub fallback: String,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_attempts: 5,
            fallback: "PING".to_string(),
        }
    }
}

/// Network deadlines in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection setup and every round trip within a batch
    pub batch_ms: u64,

    /// Out-of-band connectivity probe
    pub probe_ms: u64,

    /// Startup connectivity check
    pub preflight_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            batch_ms: 5000,
            probe_ms: 2000,
            preflight_ms: 3000,
        }
    }
}

impl TimeoutConfig {
    /// Batch deadline as a [`Duration`]
    pub fn batch(&self) -> Duration {
        Duration::from_millis(self.batch_ms)
    }

    /// Probe deadline as a [`Duration`]
    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }

    /// Preflight deadline as a [`Duration`]
    pub fn preflight(&self) -> Duration {
        Duration::from_millis(self.preflight_ms)
    }
}

/// Halt thresholds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Consecutive liveness failures that halt the run
    pub liveness_failure_limit: u32,

    /// Consecutive failures that trigger a connectivity probe
    pub connectivity_check_after: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            liveness_failure_limit: 5,
            connectivity_check_after: 3,
        }
    }
}

/// Delay between batches
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Lower bound in milliseconds
    pub min_delay_ms: u64,

    /// Upper bound in milliseconds (inclusive)
    pub max_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 100,
            max_delay_ms: 500,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json)
    pub format: LogFormat,

    /// Directory for the run's log files (None picks a default)
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            dir: None,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,

    /// JSON format
    Json,
}

//! Run reporting
//!
//! The controller hands every batch outcome, run event and the final summary
//! to an [`OutcomeSink`]. [`LogSink`] persists them to three log files,
//! [`CollectingSink`] keeps them in memory.

use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::batch::ExecutionMode;
use crate::controller::{RunEvent, RunSummary};
use crate::error::{FuzzerError, Result};
use crate::executor::BatchOutcome;

/// System-wide log directory tried before the temp dir
pub const SYSTEM_LOG_DIR: &str = "/var/log/ferrite-fuzzer";

/// Receives everything a run produces.
pub trait OutcomeSink: Send + Sync {
    /// Called once per executed batch
    fn record_batch(&self, outcome: &BatchOutcome) -> Result<()>;

    /// Called for connectivity checks, halts and interrupts
    fn record_event(&self, event: &RunEvent) -> Result<()>;

    /// Called once when the run ends
    fn record_summary(&self, summary: &RunSummary) -> Result<()>;
}

/// Run parameters written at the top of the summary log
#[derive(Debug, Clone, Serialize)]
pub struct RunHeader {
    /// Target address
    pub target: String,
    /// Batches requested
    pub batches: u64,
    /// Dispatch mode
    pub mode: ExecutionMode,
    /// Whether commands are mutated
    pub fuzz: bool,
    /// RESP protocol version
    pub protocol: u8,
    /// Corpus location
    pub corpus: String,
}

/// Files written by a [`LogSink`]
#[derive(Debug, Clone)]
pub struct LogPaths {
    /// Directory holding the files
    pub dir: PathBuf,
    /// Every batch, one JSON object per line
    pub commands: PathBuf,
    /// Failed batches and halt events, one JSON object per line
    pub errors: PathBuf,
    /// Human-readable run summary
    pub summary: PathBuf,
}

impl LogPaths {
    fn new(dir: &Path) -> Self {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let id = uuid::Uuid::new_v4().simple().to_string();
        let id = &id[..8];
        let file = |kind: &str| dir.join(format!("fuzzer-{}-{}-{}.log", kind, stamp, id));
        Self {
            dir: dir.to_path_buf(),
            commands: file("commands"),
            errors: file("errors"),
            summary: file("summary"),
        }
    }
}

struct LogFiles {
    commands: LineWriter<File>,
    errors: LineWriter<File>,
    summary: LineWriter<File>,
}

/// Writes run output to log files.
pub struct LogSink {
    paths: LogPaths,
    files: Mutex<LogFiles>,
}

impl LogSink {
    /// Create the three log files in `dir` and write the summary header.
    pub fn create(dir: &Path, header: &RunHeader) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| report_error(dir, e))?;
        let paths = LogPaths::new(dir);

        let files = LogFiles {
            commands: open(&paths.commands)?,
            errors: open(&paths.errors)?,
            summary: open(&paths.summary)?,
        };
        let sink = Self {
            paths,
            files: Mutex::new(files),
        };
        sink.write_header(header)?;

        debug!(dir = %sink.paths.dir.display(), "log files created");
        Ok(sink)
    }

    /// Paths of the log files
    pub fn paths(&self) -> &LogPaths {
        &self.paths
    }

    fn write_header(&self, header: &RunHeader) -> Result<()> {
        let text = format!(
            "ferrite-fuzzer run started {}\n\
             target:    {}\n\
             batches:   {}\n\
             mode:      {}\n\
             fuzzing:   {}\n\
             protocol:  RESP{}\n\
             corpus:    {}\n\
             commands:  {}\n\
             errors:    {}\n\
             {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            header.target,
            header.batches,
            header.mode,
            if header.fuzz { "enabled" } else { "disabled" },
            header.protocol,
            header.corpus,
            self.paths.commands.display(),
            self.paths.errors.display(),
            "-".repeat(60),
        );
        let mut files = self.files.lock();
        writeln!(files.summary, "{}", text).map_err(|e| report_error(&self.paths.summary, e))
    }

    fn summary_line(&self, files: &mut LogFiles, line: &str) -> Result<()> {
        writeln!(files.summary, "[{}] {}", timestamp(), line)
            .map_err(|e| report_error(&self.paths.summary, e))
    }
}

impl OutcomeSink for LogSink {
    fn record_batch(&self, outcome: &BatchOutcome) -> Result<()> {
        let line = to_json_line(outcome)?;
        let mut files = self.files.lock();
        writeln!(files.commands, "{}", line).map_err(|e| report_error(&self.paths.commands, e))?;

        if let Some(reason) = outcome.failure_reason() {
            writeln!(files.errors, "{}", line).map_err(|e| report_error(&self.paths.errors, e))?;
            self.summary_line(
                &mut files,
                &format!("batch {} FAILED: {}", outcome.batch_number, reason),
            )?;
        }
        Ok(())
    }

    fn record_event(&self, event: &RunEvent) -> Result<()> {
        let mut files = self.files.lock();
        let text = match event {
            RunEvent::ConnectivityCheck {
                batch,
                passed: true,
                ..
            } => format!("connectivity check after batch {}: passed", batch),
            RunEvent::ConnectivityCheck { batch, detail, .. } => format!(
                "connectivity check after batch {}: FAILED: {}",
                batch,
                detail.as_deref().unwrap_or("unknown error")
            ),
            RunEvent::Halted {
                batch,
                state,
                reason,
            } => format!("HALTED at batch {} ({}): {}", batch, state, reason),
            RunEvent::Interrupted { completed } => {
                format!("INTERRUPTED after {} batches", completed)
            }
            RunEvent::PreflightFailed { detail } => {
                format!("preflight check FAILED: {}", detail)
            }
        };

        let is_error = !matches!(event, RunEvent::ConnectivityCheck { passed: true, .. });
        if is_error {
            let line = to_json_line(event)?;
            writeln!(files.errors, "{}", line).map_err(|e| report_error(&self.paths.errors, e))?;
        }
        self.summary_line(&mut files, &text)
    }

    fn record_summary(&self, summary: &RunSummary) -> Result<()> {
        let text = format!(
            "{}\n\
             final state:        {}\n\
             batches requested:  {}\n\
             batches attempted:  {}\n\
             successful batches: {}\n\
             failed batches:     {}\n\
             failure rate:       {:.2}%\n\
             halt reason:        {}\n\
             duration:           {:.1}s",
            "-".repeat(60),
            summary.final_state,
            summary.batches_requested,
            summary.batches_attempted,
            summary.successes,
            summary.failures,
            summary.failure_rate,
            summary.halt_reason.as_deref().unwrap_or("none"),
            summary.duration_ms as f64 / 1000.0,
        );
        let mut files = self.files.lock();
        writeln!(files.summary, "{}", text).map_err(|e| report_error(&self.paths.summary, e))?;
        files
            .summary
            .flush()
            .map_err(|e| report_error(&self.paths.summary, e))
    }
}

/// Pick the log directory.
///
/// Tries the configured directory, then [`SYSTEM_LOG_DIR`], then
/// `<tmp>/ferrite-fuzzer`, and finally the temp dir itself.
pub fn resolve_log_dir(configured: Option<&Path>) -> PathBuf {
    let temp = std::env::temp_dir();
    let candidates = configured
        .map(Path::to_path_buf)
        .into_iter()
        .chain([PathBuf::from(SYSTEM_LOG_DIR), temp.join("ferrite-fuzzer")]);

    for dir in candidates {
        if is_writable(&dir) {
            return dir;
        }
        debug!(dir = %dir.display(), "log directory not writable");
    }
    warn!(dir = %temp.display(), "falling back to temp dir for logs");
    temp
}

fn is_writable(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(format!(".write-test-{}", uuid::Uuid::new_v4().simple()));
    match File::create(&probe) {
        Ok(_) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

fn open(path: &Path) -> Result<LineWriter<File>> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(LineWriter::new)
        .map_err(|e| report_error(path, e))
}

fn to_json_line<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| FuzzerError::Report(e.to_string()))
}

fn report_error(path: &Path, error: std::io::Error) -> FuzzerError {
    FuzzerError::Report(format!("{}: {}", path.display(), error))
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

#[derive(Debug, Default)]
struct Collected {
    outcomes: Vec<BatchOutcome>,
    events: Vec<RunEvent>,
    summary: Option<RunSummary>,
}

/// Keeps everything in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    inner: Arc<Mutex<Collected>>,
}

impl CollectingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded batch outcomes
    pub fn outcomes(&self) -> Vec<BatchOutcome> {
        self.inner.lock().outcomes.clone()
    }

    /// Recorded events
    pub fn events(&self) -> Vec<RunEvent> {
        self.inner.lock().events.clone()
    }

    /// The run summary, once recorded
    pub fn summary(&self) -> Option<RunSummary> {
        self.inner.lock().summary.clone()
    }
}

impl OutcomeSink for CollectingSink {
    fn record_batch(&self, outcome: &BatchOutcome) -> Result<()> {
        self.inner.lock().outcomes.push(outcome.clone());
        Ok(())
    }

    fn record_event(&self, event: &RunEvent) -> Result<()> {
        self.inner.lock().events.push(event.clone());
        Ok(())
    }

    fn record_summary(&self, summary: &RunSummary) -> Result<()> {
        self.inner.lock().summary = Some(summary.clone());
        Ok(())
    }
}

//! Batch execution driver
//!
//! Sends a [`Batch`] to the target and turns whatever happens into a
//! [`BatchOutcome`]. Nothing in here returns an error: refused connections,
//! timeouts and garbage replies are all recorded and left for the resilience
//! controller to judge.

use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};

use ferrite_protocol::{ClientError, DecodeError, Frame, PipelineError, ResponseMode};

use crate::batch::{Batch, ExecutionMode, LivenessProbe};
use crate::config::PacingConfig;
use crate::transport::Connector;

/// Commands sent when a pipelined batch has nothing else to send
pub const FILLER_COMMANDS: [&str; 3] = ["PING pipeline_test", "INFO", "TIME"];

/// Hex digits of a binary reply kept in its rendered form
const BINARY_PREVIEW_HEX_DIGITS: usize = 60;

/// What happened to one command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The server replied
    Reply {
        /// Rendered reply
        reply: String,
    },
    /// The server replied with an error
    ServerError {
        /// Error message
        message: String,
    },
    /// A reply arrived but could not be decoded
    DecodeError {
        /// Decode failure
        error: String,
    },
    /// The connection failed while sending or waiting
    Transport {
        /// Transport failure
        error: String,
    },
    /// The command was never sent
    Skipped {
        /// Why it was not sent
        reason: String,
    },
}

/// One command and its outcome
#[derive(Debug, Clone, Serialize)]
pub struct CommandRecord {
    /// Command as sent (lossy UTF-8)
    pub command: String,
    /// Mutation strategy that produced it
    pub strategy: &'static str,
    /// What happened
    pub outcome: CommandOutcome,
}

/// Result of the liveness probe
#[derive(Debug, Clone, Serialize)]
pub struct LivenessRecord {
    /// Probe command line
    pub command: String,
    /// Whether the exact token came back
    pub passed: bool,
    /// Rendered reply, if one arrived
    pub reply: Option<String>,
    /// Failure, if the probe could not complete
    pub error: Option<String>,
}

impl LivenessRecord {
    fn pending(probe: &LivenessProbe) -> Self {
        Self {
            command: probe.command_line(),
            passed: false,
            reply: None,
            error: None,
        }
    }
}

/// Everything observed while executing one batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    /// Batch number
    pub batch_number: u64,
    /// Dispatch mode
    pub mode: ExecutionMode,
    /// When execution started
    pub started_at: DateTime<Utc>,
    /// Commands written to the server, liveness probe excluded
    pub commands_sent: usize,
    /// Replies read back, liveness probe excluded
    pub responses_received: usize,
    /// Whether the liveness probe passed
    pub liveness_passed: bool,
    /// Whether a transport failure occurred
    pub hard_error: bool,
    /// Whether filler commands replaced an empty pipeline
    pub filler_substituted: bool,
    /// Liveness probe details
    pub liveness: LivenessRecord,
    /// Per-command results in send order
    pub results: Vec<CommandRecord>,
    /// Transport-level notes
    pub notes: Vec<String>,
    /// Wall-clock execution time, pacing excluded
    pub elapsed_ms: u64,
}

impl BatchOutcome {
    fn new(batch: &Batch) -> Self {
        Self {
            batch_number: batch.number,
            mode: batch.mode,
            started_at: Utc::now(),
            commands_sent: 0,
            responses_received: 0,
            liveness_passed: false,
            hard_error: false,
            filler_substituted: false,
            liveness: LivenessRecord::pending(&batch.probe),
            results: Vec::with_capacity(batch.commands.len()),
            notes: Vec::new(),
            elapsed_ms: 0,
        }
    }

    /// A batch succeeds when the probe passed and no transport error occurred.
    pub fn succeeded(&self) -> bool {
        self.liveness_passed && !self.hard_error
    }

    /// Number of commands the server rejected
    pub fn server_errors(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, CommandOutcome::ServerError { .. }))
            .count()
    }

    /// Short reason for a failed batch
    pub fn failure_reason(&self) -> Option<String> {
        if self.succeeded() {
            return None;
        }
        let mut reasons = Vec::new();
        if !self.liveness_passed {
            reasons.push(match &self.liveness.error {
                Some(error) => format!("liveness check failed: {}", error),
                None => match &self.liveness.reply {
                    Some(reply) => format!("liveness check got unexpected reply: {}", reply),
                    None => "liveness check failed".to_string(),
                },
            });
        }
        if self.hard_error {
            reasons.push(match self.notes.first() {
                Some(note) => format!("connection error: {}", note),
                None => "connection error".to_string(),
            });
        }
        Some(reasons.join("; "))
    }

    /// The first transport failure always leads `notes`.
    fn transport_failure(&mut self, context: &str, error: &ClientError) {
        let note = format!("{}: {}", context, error);
        if self.hard_error {
            self.notes.push(note);
        } else {
            self.notes.insert(0, note);
        }
        self.hard_error = true;
        if error.is_timeout() {
            self.liveness_passed = false;
        }
    }
}

/// Render a reply for logs.
///
/// Text that is not valid UTF-8 is shown as a hex preview.
pub fn render_frame(frame: &Frame) -> String {
    match frame {
        Frame::Simple(s) => render_text(s),
        Frame::Error(s) | Frame::BulkError(s) => format!("(error) {}", render_text(s)),
        Frame::Integer(n) => format!("(integer) {}", n),
        Frame::Bulk(Some(b)) => render_text(b),
        Frame::Bulk(None) | Frame::Array(None) | Frame::Null => "(nil)".to_string(),
        Frame::Boolean(b) => format!("(boolean) {}", b),
        Frame::Double(d) => format!("(double) {}", d),
        Frame::BigNumber(n) => format!("(big number) {}", render_text(n)),
        Frame::VerbatimString { data, .. } => render_text(data),
        Frame::Array(Some(items)) | Frame::Set(items) | Frame::Push(items) => format!(
            "[{}]",
            items.iter().map(render_frame).collect::<Vec<_>>().join(", ")
        ),
        Frame::Map(pairs) => format!(
            "{{{}}}",
            pairs
                .iter()
                .map(|(k, v)| format!("{}: {}", render_frame(k), render_frame(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn render_text(bytes: &Bytes) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let hex = hex::encode(bytes);
            let preview = &hex[..hex.len().min(BINARY_PREVIEW_HEX_DIGITS)];
            format!("<binary data: {}...>", preview)
        }
    }
}

fn reply_outcome(frame: &Frame) -> CommandOutcome {
    match frame.error_message() {
        Some(message) => CommandOutcome::ServerError { message },
        None => CommandOutcome::Reply {
            reply: render_frame(frame),
        },
    }
}

fn decode_outcome(error: &DecodeError) -> CommandOutcome {
    CommandOutcome::DecodeError {
        error: error.to_string(),
    }
}

/// Executes batches against a target reached through `C`.
pub struct Executor<C> {
    connector: C,
    timeout: Duration,
    pacing: PacingConfig,
}

impl<C: Connector> Executor<C> {
    /// Create an executor. `timeout` bounds connection setup and every round
    /// trip.
    pub fn new(connector: C, timeout: Duration, pacing: PacingConfig) -> Self {
        Self {
            connector,
            timeout,
            pacing,
        }
    }

    /// The underlying connector
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Execute one batch, then idle for the pacing delay.
    pub async fn execute<R: Rng + ?Sized>(&self, batch: &Batch, rng: &mut R) -> BatchOutcome {
        let pause = self.pause(rng);
        let started = Instant::now();

        let mut outcome = match batch.mode {
            ExecutionMode::Sequential => self.execute_sequential(batch).await,
            ExecutionMode::Pipelined => self.execute_pipelined(batch).await,
        };
        outcome.elapsed_ms = started.elapsed().as_millis() as u64;

        debug!(
            batch = outcome.batch_number,
            mode = %outcome.mode,
            sent = outcome.commands_sent,
            received = outcome.responses_received,
            liveness = outcome.liveness_passed,
            hard_error = outcome.hard_error,
            elapsed_ms = outcome.elapsed_ms,
            "batch executed"
        );

        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        outcome
    }

    fn pause<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = self.pacing.min_delay_ms;
        let max = self.pacing.max_delay_ms.max(min);
        Duration::from_millis(rng.gen_range(min..=max))
    }

    /// Liveness probe first, then every command in order on one connection.
    async fn execute_sequential(&self, batch: &Batch) -> BatchOutcome {
        let mut outcome = BatchOutcome::new(batch);

        let mut session = match self.connector.connect(ResponseMode::Decoded, self.timeout).await {
            Ok(session) => session,
            Err(e) => {
                warn!(batch = batch.number, error = %e, "failed to connect");
                outcome.liveness.error = Some(e.to_string());
                outcome.transport_failure("connect", &e);
                skip_remaining(&mut outcome, batch, 0, "not sent: connection failed");
                return outcome;
            }
        };

        let probe_ok = match session.execute(&batch.probe.args()).await {
            Ok(reply) => {
                outcome.liveness_passed = batch.probe.matches(&reply);
                outcome.liveness.reply = Some(render_frame(&reply));
                true
            }
            Err(e) => {
                outcome.liveness.error = Some(e.to_string());
                if e.is_transport() {
                    outcome.transport_failure("liveness check", &e);
                    false
                } else {
                    true
                }
            }
        };
        outcome.liveness.passed = outcome.liveness_passed;

        if !probe_ok {
            skip_remaining(&mut outcome, batch, 0, "not sent: connection lost");
            session.close().await;
            return outcome;
        }

        for (index, command) in batch.commands.iter().enumerate() {
            let args = command.args();
            let display = command.display().into_owned();
            if args.is_empty() {
                outcome.results.push(CommandRecord {
                    command: display,
                    strategy: command.strategy_name(),
                    outcome: CommandOutcome::Skipped {
                        reason: "empty command".to_string(),
                    },
                });
                continue;
            }

            outcome.commands_sent += 1;
            let result = match session.execute(&args).await {
                Ok(reply) => {
                    outcome.responses_received += 1;
                    reply_outcome(&reply)
                }
                Err(ClientError::Decode(e)) if e.breaks_stream() => {
                    outcome.responses_received += 1;
                    warn!(
                        batch = batch.number,
                        command = index + 1,
                        error = %e,
                        "reply stream desynchronized"
                    );
                    outcome.results.push(CommandRecord {
                        command: display,
                        strategy: command.strategy_name(),
                        outcome: decode_outcome(&e),
                    });
                    skip_remaining(
                        &mut outcome,
                        batch,
                        index + 1,
                        "not sent: reply stream desynchronized",
                    );
                    break;
                }
                Err(ClientError::Decode(e)) => {
                    outcome.responses_received += 1;
                    decode_outcome(&e)
                }
                Err(e) => {
                    outcome.transport_failure(&format!("command {}", index + 1), &e);
                    outcome.results.push(CommandRecord {
                        command: display,
                        strategy: command.strategy_name(),
                        outcome: CommandOutcome::Transport {
                            error: e.to_string(),
                        },
                    });
                    skip_remaining(&mut outcome, batch, index + 1, "not sent: connection lost");
                    break;
                }
            };
            outcome.results.push(CommandRecord {
                command: display,
                strategy: command.strategy_name(),
                outcome: result,
            });
        }

        outcome.liveness.passed = outcome.liveness_passed;
        session.close().await;
        outcome
    }

    /// Liveness probe on its own connection, then every command in one
    /// pipelined write on a second, raw-mode connection.
    async fn execute_pipelined(&self, batch: &Batch) -> BatchOutcome {
        let mut outcome = BatchOutcome::new(batch);

        self.check_liveness(&batch.probe, &mut outcome).await;

        let mut queued: Vec<(String, &'static str, Vec<Bytes>)> = Vec::new();
        for command in &batch.commands {
            let args = command.args();
            if args.is_empty() {
                outcome.results.push(CommandRecord {
                    command: command.display().into_owned(),
                    strategy: command.strategy_name(),
                    outcome: CommandOutcome::Skipped {
                        reason: "empty command".to_string(),
                    },
                });
            } else {
                queued.push((command.display().into_owned(), command.strategy_name(), args));
            }
        }

        if queued.is_empty() {
            debug!(batch = batch.number, "pipeline is empty, sending filler commands");
            outcome.filler_substituted = true;
            outcome
                .notes
                .push("pipeline had no commands; filler commands substituted".to_string());
            queued = FILLER_COMMANDS
                .iter()
                .map(|line| {
                    let args = line
                        .split_ascii_whitespace()
                        .map(|arg| Bytes::copy_from_slice(arg.as_bytes()))
                        .collect();
                    (line.to_string(), "filler", args)
                })
                .collect();
        }

        let commands: Vec<Vec<Bytes>> = queued.iter().map(|(_, _, args)| args.clone()).collect();

        let replies = match self.connector.connect(ResponseMode::Raw, self.timeout).await {
            Ok(mut session) => {
                outcome.commands_sent = commands.len();
                let replies = session.pipeline(&commands).await;
                session.close().await;
                replies
            }
            Err(e) => Err(PipelineError::from(e)),
        };

        // Replies that arrived before a transport failure are kept; only the
        // slots after them are charged to the failure.
        let (replies, unanswered) = match replies {
            Ok(replies) => (replies, "no reply received".to_string()),
            Err(PipelineError { replies, error }) => {
                warn!(
                    batch = batch.number,
                    received = replies.len(),
                    error = %error,
                    "pipeline failed"
                );
                outcome.transport_failure("pipeline", &error);
                (replies, error.to_string())
            }
        };

        outcome.responses_received = replies.len();
        let mut replies = replies.into_iter();
        for (command, strategy, _) in queued {
            let result = match replies.next() {
                Some(Ok(frame)) => reply_outcome(&frame),
                Some(Err(e)) => decode_outcome(&e),
                None => CommandOutcome::Transport {
                    error: unanswered.clone(),
                },
            };
            outcome.results.push(CommandRecord {
                command,
                strategy,
                outcome: result,
            });
        }

        outcome.liveness.passed = outcome.liveness_passed;
        outcome
    }

    async fn check_liveness(&self, probe: &LivenessProbe, outcome: &mut BatchOutcome) {
        let mut session = match self.connector.connect(ResponseMode::Decoded, self.timeout).await {
            Ok(session) => session,
            Err(e) => {
                warn!(batch = outcome.batch_number, error = %e, "liveness connection failed");
                outcome.liveness.error = Some(e.to_string());
                outcome.liveness_passed = false;
                outcome.transport_failure("liveness connection", &e);
                return;
            }
        };

        match session.execute(&probe.args()).await {
            Ok(reply) => {
                outcome.liveness_passed = probe.matches(&reply);
                outcome.liveness.reply = Some(render_frame(&reply));
            }
            Err(e) => {
                outcome.liveness.error = Some(e.to_string());
                outcome.liveness_passed = false;
                if e.is_transport() {
                    outcome.transport_failure("liveness check", &e);
                }
            }
        }
        outcome.liveness.passed = outcome.liveness_passed;
        session.close().await;
    }
}

fn skip_remaining(outcome: &mut BatchOutcome, batch: &Batch, from: usize, reason: &str) {
    for command in batch.commands.iter().skip(from) {
        outcome.results.push(CommandRecord {
            command: command.display().into_owned(),
            strategy: command.strategy_name(),
            outcome: CommandOutcome::Skipped {
                reason: reason.to_string(),
            },
        });
    }
}

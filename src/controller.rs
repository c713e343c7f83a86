//! Resilience controller
//!
//! Owns the bounded batch loop. After every batch it folds the outcome into
//! a [`ResilienceState`] and decides whether to keep going, check that the
//! server is still reachable, or halt.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use ferrite_protocol::ResponseMode;

use crate::batch::{random_size, BatchBuilder, ExecutionMode};
use crate::config::ResilienceConfig;
use crate::corpus::Corpus;
use crate::error::{FuzzerError, Result};
use crate::executor::{render_frame, BatchOutcome, Executor};
use crate::report::OutcomeSink;
use crate::transport::Connector;

/// Batches between progress lines when not verbose
const PROGRESS_INTERVAL: u64 = 10;

/// Consecutive failure counters carried from batch to batch.
///
/// `consecutive_liveness_failures` never exceeds `consecutive_failures`:
/// a liveness failure is always a failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResilienceState {
    /// Failed batches in a row
    pub consecutive_failures: u32,
    /// Batches in a row whose liveness probe failed
    pub consecutive_liveness_failures: u32,
}

/// What the controller should do after a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run the next batch
    Continue,
    /// Probe connectivity before deciding
    CheckConnectivity,
    /// Stop: the server keeps failing liveness checks
    HaltLiveness,
}

impl ResilienceState {
    /// Fold one batch outcome into the state.
    pub fn observe(self, outcome: &BatchOutcome, limits: &ResilienceConfig) -> (Self, Decision) {
        self.step(outcome.liveness_passed, outcome.hard_error, limits)
    }

    /// Transition on the two signals a batch produces.
    pub fn step(
        self,
        liveness_passed: bool,
        hard_error: bool,
        limits: &ResilienceConfig,
    ) -> (Self, Decision) {
        if liveness_passed && !hard_error {
            return (Self::default(), Decision::Continue);
        }

        let next = Self {
            consecutive_failures: self.consecutive_failures.saturating_add(1),
            consecutive_liveness_failures: if liveness_passed {
                self.consecutive_liveness_failures
            } else {
                self.consecutive_liveness_failures.saturating_add(1)
            },
        };

        let decision = if next.consecutive_liveness_failures >= limits.liveness_failure_limit {
            Decision::HaltLiveness
        } else if next.consecutive_failures >= limits.connectivity_check_after {
            Decision::CheckConnectivity
        } else {
            Decision::Continue
        };
        (next, decision)
    }
}

/// Where the run is, or how it ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Batches are being executed
    Running,
    /// Stopped after too many consecutive liveness failures
    HaltedLiveness,
    /// Stopped because the connectivity probe failed
    HaltedConnectivity,
    /// Every requested batch ran
    Completed,
    /// Stopped by an external signal
    Interrupted,
}

impl RunState {
    /// Process exit code for a run that ended in this state
    pub fn exit_code(&self) -> u8 {
        match self {
            RunState::Completed => 0,
            RunState::Interrupted => 130,
            RunState::Running | RunState::HaltedLiveness | RunState::HaltedConnectivity => 1,
        }
    }

    /// Returns true for the two halted states
    pub fn is_halted(&self) -> bool {
        matches!(self, RunState::HaltedLiveness | RunState::HaltedConnectivity)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Running => "RUNNING",
            RunState::HaltedLiveness => "HALTED_LIVENESS",
            RunState::HaltedConnectivity => "HALTED_CONNECTIVITY",
            RunState::Completed => "COMPLETED",
            RunState::Interrupted => "INTERRUPTED",
        };
        f.write_str(s)
    }
}

/// Notable moments of a run, besides batch outcomes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// An out-of-band connectivity probe ran
    ConnectivityCheck {
        /// Batch that triggered it
        batch: u64,
        /// Whether the server answered PONG
        passed: bool,
        /// Failure detail
        detail: Option<String>,
    },
    /// The run halted
    Halted {
        /// Last batch executed
        batch: u64,
        /// Terminal state
        state: RunState,
        /// Why
        reason: String,
    },
    /// The run was interrupted
    Interrupted {
        /// Batches completed before the interrupt
        completed: u64,
    },
    /// The server did not answer the startup PING
    PreflightFailed {
        /// Failure detail
        detail: String,
    },
}

/// Final statistics of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Target address
    pub target: String,
    /// Dispatch mode
    pub mode: ExecutionMode,
    /// Whether commands were mutated
    pub fuzz: bool,
    /// Batches requested
    pub batches_requested: u64,
    /// Batches actually executed
    pub batches_attempted: u64,
    /// Batches that passed
    pub successes: u64,
    /// Batches that failed
    pub failures: u64,
    /// Failures as a percentage of attempted batches
    pub failure_rate: f64,
    /// How the run ended
    pub final_state: RunState,
    /// Why the run halted, if it did
    pub halt_reason: Option<String>,
    /// Counters at the end of the run
    pub resilience: ResilienceState,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Total run time
    pub duration_ms: u64,
}

/// Percentage of failed batches; 0 when nothing ran.
pub fn failure_rate(failures: u64, attempted: u64) -> f64 {
    if attempted == 0 {
        0.0
    } else {
        failures as f64 * 100.0 / attempted as f64
    }
}

/// Loop parameters
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Number of batches to run
    pub batches: u64,
    /// Upper bound for the random batch size
    pub max_batch_size: usize,
    /// Halt thresholds
    pub resilience: ResilienceConfig,
    /// Deadline of the connectivity probe
    pub probe_timeout: Duration,
    /// Deadline of the startup check
    pub preflight_timeout: Duration,
    /// Log every batch instead of periodic progress
    pub verbose: bool,
}

/// Drives batches until completion, halt or interrupt.
pub struct Controller<C> {
    executor: Executor<C>,
    settings: RunSettings,
}

impl<C: Connector> Controller<C> {
    /// Create a controller
    pub fn new(executor: Executor<C>, settings: RunSettings) -> Self {
        Self { executor, settings }
    }

    /// Check that the server answers PING before the first batch.
    pub async fn preflight(&self) -> Result<()> {
        let target = self.executor.connector().target();
        info!(target = %target, "checking connectivity");
        self.ping(self.settings.preflight_timeout)
            .await
            .map_err(|detail| FuzzerError::Preflight(format!("{}: {}", target, detail)))
    }

    /// PING on a fresh connection; passes only on PONG.
    pub async fn check_connectivity(&self) -> std::result::Result<(), String> {
        self.ping(self.settings.probe_timeout).await
    }

    async fn ping(&self, timeout: Duration) -> std::result::Result<(), String> {
        let mut session = self
            .executor
            .connector()
            .connect(ResponseMode::Decoded, timeout)
            .await
            .map_err(|e| e.to_string())?;
        let reply = session.execute(&[bytes::Bytes::from_static(b"PING")]).await;
        session.close().await;

        match reply {
            Ok(frame) if frame.as_str() == Some("PONG") => Ok(()),
            Ok(frame) => Err(format!("unexpected PING reply: {}", render_frame(&frame))),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Run batches `1..=N`.
    ///
    /// The shutdown receiver is polled between batches. A summary is
    /// produced and handed to the sink however the run ends.
    pub async fn run<K, S, R>(
        &self,
        builder: &BatchBuilder<'_, K>,
        sink: &S,
        rng: &mut R,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> RunSummary
    where
        K: Corpus + ?Sized,
        S: OutcomeSink + ?Sized,
        R: Rng + ?Sized,
    {
        let started_at = Utc::now();
        let started = Instant::now();
        let limits = self.settings.resilience;

        let mut state = ResilienceState::default();
        let mut run_state = RunState::Running;
        let mut halt_reason = None;
        let mut attempted = 0u64;
        let mut successes = 0u64;
        let mut failures = 0u64;

        info!(
            batches = self.settings.batches,
            mode = %builder.mode(),
            fuzz = builder.fuzz(),
            "starting run"
        );

        for number in 1..=self.settings.batches {
            if interrupted(shutdown) {
                info!(completed = attempted, "interrupt received, stopping");
                run_state = RunState::Interrupted;
                emit(sink, &RunEvent::Interrupted { completed: attempted });
                break;
            }

            let size = random_size(rng, self.settings.max_batch_size);
            let batch = builder.build(number, size, rng);
            let outcome = self.executor.execute(&batch, rng).await;
            attempted += 1;

            if let Err(e) = sink.record_batch(&outcome) {
                warn!(batch = number, error = %e, "failed to record batch outcome");
            }

            if outcome.succeeded() {
                successes += 1;
            } else {
                failures += 1;
                let reason = outcome.failure_reason().unwrap_or_default();
                warn!(batch = number, reason = %reason, "batch failed");
            }

            if self.settings.verbose {
                info!(
                    batch = number,
                    commands = batch.commands.len(),
                    liveness = outcome.liveness_passed,
                    hard_error = outcome.hard_error,
                    server_errors = outcome.server_errors(),
                    "batch complete"
                );
            } else if number % PROGRESS_INTERVAL == 0 || number == self.settings.batches {
                info!(
                    completed = number,
                    total = self.settings.batches,
                    successes,
                    failures,
                    "progress"
                );
            }

            let (next, decision) = state.observe(&outcome, &limits);
            state = next;
            debug!(
                batch = number,
                failures = state.consecutive_failures,
                liveness_failures = state.consecutive_liveness_failures,
                ?decision,
                "resilience state"
            );

            match decision {
                Decision::Continue => {}
                Decision::HaltLiveness => {
                    let reason = format!(
                        "server failed {} consecutive liveness checks",
                        state.consecutive_liveness_failures
                    );
                    error!(batch = number, "{}", reason);
                    run_state = RunState::HaltedLiveness;
                    emit(
                        sink,
                        &RunEvent::Halted {
                            batch: number,
                            state: run_state,
                            reason: reason.clone(),
                        },
                    );
                    halt_reason = Some(reason);
                    break;
                }
                Decision::CheckConnectivity => {
                    warn!(
                        batch = number,
                        failures = state.consecutive_failures,
                        "consecutive failures, checking connectivity"
                    );
                    let probe = self.check_connectivity().await;
                    emit(
                        sink,
                        &RunEvent::ConnectivityCheck {
                            batch: number,
                            passed: probe.is_ok(),
                            detail: probe.as_ref().err().cloned(),
                        },
                    );
                    match probe {
                        Ok(()) => info!(batch = number, "connectivity check passed, continuing"),
                        Err(detail) => {
                            let reason = format!(
                                "connectivity check failed after {} consecutive failures: {}",
                                state.consecutive_failures, detail
                            );
                            error!(batch = number, "{}", reason);
                            run_state = RunState::HaltedConnectivity;
                            emit(
                                sink,
                                &RunEvent::Halted {
                                    batch: number,
                                    state: run_state,
                                    reason: reason.clone(),
                                },
                            );
                            halt_reason = Some(reason);
                            break;
                        }
                    }
                }
            }
        }

        if run_state == RunState::Running {
            run_state = RunState::Completed;
        }

        let summary = RunSummary {
            target: self.executor.connector().target(),
            mode: builder.mode(),
            fuzz: builder.fuzz(),
            batches_requested: self.settings.batches,
            batches_attempted: attempted,
            successes,
            failures,
            failure_rate: failure_rate(failures, attempted),
            final_state: run_state,
            halt_reason,
            resilience: state,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            state = %summary.final_state,
            attempted = summary.batches_attempted,
            successes = summary.successes,
            failures = summary.failures,
            failure_rate = summary.failure_rate,
            "run finished"
        );

        if let Err(e) = sink.record_summary(&summary) {
            warn!(error = %e, "failed to record run summary");
        }
        summary
    }
}

fn interrupted(shutdown: &mut broadcast::Receiver<()>) -> bool {
    use broadcast::error::TryRecvError;
    matches!(shutdown.try_recv(), Ok(()) | Err(TryRecvError::Lagged(_)))
}

fn emit<S: OutcomeSink + ?Sized>(sink: &S, event: &RunEvent) {
    if let Err(e) = sink.record_event(event) {
        warn!(error = %e, "failed to record run event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PacingConfig;
    use crate::corpus::{MemoryCorpus, Sampler};
    use crate::report::CollectingSink;
    use crate::transport::scripted::{Open, ScriptedConnector, Step};
    use ferrite_protocol::Frame;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const LIMITS: ResilienceConfig = ResilienceConfig {
        liveness_failure_limit: 5,
        connectivity_check_after: 3,
    };

    fn controller(connector: ScriptedConnector, batches: u64) -> Controller<ScriptedConnector> {
        let executor = Executor::new(
            connector,
            Duration::from_millis(100),
            PacingConfig {
                min_delay_ms: 0,
                max_delay_ms: 0,
            },
        );
        Controller::new(
            executor,
            RunSettings {
                batches,
                max_batch_size: 3,
                resilience: LIMITS,
                probe_timeout: Duration::from_millis(100),
                preflight_timeout: Duration::from_millis(100),
                verbose: false,
            },
        )
    }

    /// Session whose liveness probe gets the wrong echo.
    fn dead_liveness() -> Open {
        Open::Steps(vec![Step::Reply(Frame::bulk("wrong"))])
    }

    /// Session that passes liveness and then drops the connection.
    fn hard_failure(batch: u64) -> Open {
        Open::Steps(vec![
            Step::Reply(Frame::bulk(format!("ALIVE_CHECK_{}", batch))),
            Step::Closed,
        ])
    }

    async fn run(
        connector: ScriptedConnector,
        batches: u64,
    ) -> (RunSummary, CollectingSink) {
        let corpus = MemoryCorpus::new(["GET a"]);
        let builder = BatchBuilder::new(&corpus, Sampler::default(), false, ExecutionMode::Sequential);
        let sink = CollectingSink::new();
        let (_tx, mut rx) = broadcast::channel(1);
        let mut rng = StdRng::seed_from_u64(0);
        let summary = controller(connector, batches)
            .run(&builder, &sink, &mut rng, &mut rx)
            .await;
        (summary, sink)
    }

    #[test]
    fn test_success_resets_counters() {
        let state = ResilienceState {
            consecutive_failures: 2,
            consecutive_liveness_failures: 1,
        };
        let (next, decision) = state.step(true, false, &LIMITS);
        assert_eq!(next, ResilienceState::default());
        assert_eq!(decision, Decision::Continue);
    }

    #[test]
    fn test_hard_error_with_passing_liveness() {
        let (next, decision) = ResilienceState::default().step(true, true, &LIMITS);
        assert_eq!(next.consecutive_failures, 1);
        assert_eq!(next.consecutive_liveness_failures, 0);
        assert_eq!(decision, Decision::Continue);
    }

    #[test]
    fn test_third_failure_requests_connectivity_check() {
        let mut state = ResilienceState::default();
        let mut decisions = Vec::new();
        for _ in 0..3 {
            let (next, decision) = state.step(true, true, &LIMITS);
            state = next;
            decisions.push(decision);
        }
        assert_eq!(
            decisions,
            vec![
                Decision::Continue,
                Decision::Continue,
                Decision::CheckConnectivity
            ]
        );
        assert_eq!(state.consecutive_failures, 3);
    }

    #[test]
    fn test_fifth_liveness_failure_halts() {
        let mut state = ResilienceState::default();
        let mut last = Decision::Continue;
        for _ in 0..5 {
            let (next, decision) = state.step(false, false, &LIMITS);
            assert!(next.consecutive_liveness_failures <= next.consecutive_failures);
            state = next;
            last = decision;
        }
        assert_eq!(last, Decision::HaltLiveness);
        assert_eq!(state.consecutive_liveness_failures, 5);
    }

    #[test]
    fn test_run_state_exit_codes() {
        assert_eq!(RunState::Completed.exit_code(), 0);
        assert_eq!(RunState::HaltedLiveness.exit_code(), 1);
        assert_eq!(RunState::HaltedConnectivity.exit_code(), 1);
        assert_eq!(RunState::Interrupted.exit_code(), 130);
        assert_eq!(RunState::HaltedLiveness.to_string(), "HALTED_LIVENESS");
        assert!(RunState::HaltedConnectivity.is_halted());
        assert!(!RunState::Completed.is_halted());
    }

    #[test]
    fn test_failure_rate() {
        assert_eq!(failure_rate(0, 0), 0.0);
        assert_eq!(failure_rate(1, 4), 25.0);
    }

    #[tokio::test]
    async fn test_healthy_run_completes() {
        let (summary, sink) = run(ScriptedConnector::healthy(), 4).await;

        assert_eq!(summary.final_state, RunState::Completed);
        assert_eq!(summary.batches_attempted, 4);
        assert_eq!(summary.successes, 4);
        assert_eq!(summary.failure_rate, 0.0);
        assert!(summary.halt_reason.is_none());
        assert_eq!(sink.outcomes().len(), 4);
        assert_eq!(sink.summary().unwrap().final_state, RunState::Completed);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_liveness_halt_despite_passing_probe() {
        let connector = ScriptedConnector::new([
            dead_liveness(),
            dead_liveness(),
            dead_liveness(),
            Open::Echo,
            dead_liveness(),
            Open::Echo,
            dead_liveness(),
        ]);
        let (summary, sink) = run(connector.clone(), 20).await;

        assert_eq!(summary.final_state, RunState::HaltedLiveness);
        assert_eq!(summary.batches_attempted, 5);
        assert_eq!(summary.failures, 5);
        assert_eq!(summary.resilience.consecutive_liveness_failures, 5);
        assert!(summary.halt_reason.unwrap().contains("5 consecutive liveness"));

        let checks = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, RunEvent::ConnectivityCheck { passed: true, .. }))
            .count();
        assert_eq!(checks, 2);
        assert_eq!(connector.log.lock().opened.len(), 7);
    }

    #[tokio::test]
    async fn test_passing_connectivity_check_leaves_counters_untouched() {
        let connector = ScriptedConnector::new([
            hard_failure(1),
            hard_failure(2),
            hard_failure(3),
            Open::Echo,
        ]);
        let (summary, sink) = run(connector, 3).await;

        assert_eq!(summary.final_state, RunState::Completed);
        assert_eq!(summary.failures, 3);
        assert_eq!(
            sink.events(),
            vec![RunEvent::ConnectivityCheck {
                batch: 3,
                passed: true,
                detail: None
            }]
        );
        assert_eq!(
            summary.resilience,
            ResilienceState {
                consecutive_failures: 3,
                consecutive_liveness_failures: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_success_after_connectivity_check_resets_counters() {
        let connector = ScriptedConnector::new([
            hard_failure(1),
            hard_failure(2),
            hard_failure(3),
            Open::Echo,
            Open::Echo,
        ]);
        let (summary, sink) = run(connector, 4).await;

        assert_eq!(summary.final_state, RunState::Completed);
        assert_eq!(summary.failures, 3);
        assert_eq!(summary.successes, 1);
        assert_eq!(
            sink.events(),
            vec![RunEvent::ConnectivityCheck {
                batch: 3,
                passed: true,
                detail: None
            }]
        );
        assert_eq!(summary.resilience, ResilienceState::default());
    }

    #[tokio::test]
    async fn test_failed_probe_halts() {
        let connector = ScriptedConnector::new([
            hard_failure(1),
            hard_failure(2),
            hard_failure(3),
            Open::Refused,
        ]);
        let (summary, sink) = run(connector, 10).await;

        assert_eq!(summary.final_state, RunState::HaltedConnectivity);
        assert_eq!(summary.batches_attempted, 3);
        assert_eq!(summary.final_state.exit_code(), 1);
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, RunEvent::Halted { state: RunState::HaltedConnectivity, .. })));
        assert!(sink.summary().is_some());
    }

    #[tokio::test]
    async fn test_interrupt_stops_between_batches() {
        let corpus = MemoryCorpus::new(["GET a"]);
        let builder = BatchBuilder::new(&corpus, Sampler::default(), false, ExecutionMode::Sequential);
        let sink = CollectingSink::new();
        let (tx, mut rx) = broadcast::channel(1);
        let mut rng = StdRng::seed_from_u64(0);

        tx.send(()).unwrap();
        let summary = controller(ScriptedConnector::healthy(), 10)
            .run(&builder, &sink, &mut rng, &mut rx)
            .await;

        assert_eq!(summary.final_state, RunState::Interrupted);
        assert_eq!(summary.batches_attempted, 0);
        assert_eq!(summary.final_state.exit_code(), 130);
        assert!(sink.summary().is_some());
    }

    #[tokio::test]
    async fn test_preflight() {
        let ok = controller(ScriptedConnector::healthy(), 1);
        assert!(ok.preflight().await.is_ok());

        let refused = controller(ScriptedConnector::new([Open::Refused]), 1);
        assert!(matches!(
            refused.preflight().await,
            Err(FuzzerError::Preflight(_))
        ));

        let wrong = controller(
            ScriptedConnector::new([Open::Steps(vec![Step::Reply(Frame::error("NOAUTH"))])]),
            1,
        );
        let err = wrong.preflight().await.unwrap_err();
        assert!(err.to_string().contains("unexpected PING reply"));
    }
}

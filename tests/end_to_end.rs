//! End-to-end runs against an in-process RESP server.

mod common;

use std::process::Command;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;

use ferrite_fuzzer::batch::{BatchBuilder, ExecutionMode};
use ferrite_fuzzer::config::FuzzerConfig;
use ferrite_fuzzer::controller::{Controller, RunEvent, RunSettings, RunState, RunSummary};
use ferrite_fuzzer::corpus::{FileCorpus, Sampler};
use ferrite_fuzzer::executor::{CommandOutcome, Executor};
use ferrite_fuzzer::report::{CollectingSink, LogSink, OutcomeSink, RunHeader};
use ferrite_fuzzer::transport::TcpConnector;
use ferrite_fuzzer::FuzzerError;

use common::*;

fn controller(config: &FuzzerConfig) -> Controller<TcpConnector> {
    let connector = TcpConnector::new(
        config.target.address(),
        config.target.protocol_version().unwrap(),
    );
    let executor = Executor::new(connector, config.timeouts.batch(), config.pacing);
    Controller::new(
        executor,
        RunSettings {
            batches: config.run.batches,
            max_batch_size: config.run.max_batch_size,
            resilience: config.resilience,
            probe_timeout: config.timeouts.probe(),
            preflight_timeout: config.timeouts.preflight(),
            verbose: true,
        },
    )
}

async fn run_with<S: OutcomeSink>(config: &FuzzerConfig, corpus: &FileCorpus, sink: &S) -> RunSummary {
    let controller = controller(config);
    let builder = BatchBuilder::new(corpus, Sampler::default(), config.run.fuzz, config.run.mode);
    let (_tx, mut rx) = broadcast::channel(1);
    let mut rng = StdRng::seed_from_u64(42);
    controller.run(&builder, sink, &mut rng, &mut rx).await
}

#[tokio::test]
async fn test_sequential_run_completes() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let corpus = FileCorpus::open(write_corpus(&dir, &["SET fuzz 1", "GET fuzz", "DEL fuzz"])).unwrap();

    let mut config = test_config(&server);
    config.run.batches = 5;
    let sink = CollectingSink::new();

    controller(&config).preflight().await.unwrap();
    let summary = run_with(&config, &corpus, &sink).await;

    assert_eq!(summary.final_state, RunState::Completed);
    assert_eq!(summary.batches_attempted, 5);
    assert_eq!(summary.successes, 5);
    assert_eq!(summary.failure_rate, 0.0);

    let outcomes = sink.outcomes();
    assert_eq!(outcomes.len(), 5);
    for outcome in &outcomes {
        assert!(outcome.liveness.passed);
        assert_eq!(outcome.commands_sent, outcome.responses_received);
        assert!(outcome.results.iter().all(|r| !matches!(
            r.outcome,
            CommandOutcome::ServerError { .. } | CommandOutcome::Transport { .. }
        )));
    }

    let received = server.received();
    assert_eq!(received[0][0].as_ref(), b"PING");
    assert_eq!(received[1][1].as_ref(), b"ALIVE_CHECK_1");
}

#[tokio::test]
async fn test_pipelined_resp3_run_with_fuzzing() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let corpus = FileCorpus::open(write_corpus(
        &dir,
        &["SET key value", "GET key", "ECHO hello world", "PING"],
    ))
    .unwrap();

    let mut config = test_config(&server);
    config.target.protocol = 3;
    config.run.batches = 20;
    config.run.fuzz = true;
    config.run.mode = ExecutionMode::Pipelined;
    let sink = CollectingSink::new();

    let summary = run_with(&config, &corpus, &sink).await;

    assert_eq!(summary.final_state, RunState::Completed);
    assert_eq!(summary.successes, 20);
    assert!(server.verbs().iter().any(|v| v == "HELLO"));

    for outcome in sink.outcomes() {
        assert_eq!(outcome.mode, ExecutionMode::Pipelined);
        assert!(outcome.liveness.passed);
        assert!(!outcome.hard_error);
        assert_eq!(outcome.responses_received, outcome.commands_sent);
    }
}

#[tokio::test]
async fn test_silent_liveness_halts_run() {
    let server = MockServer::start().await;
    server.mute_echo();
    let dir = tempfile::tempdir().unwrap();
    let corpus = FileCorpus::open(write_corpus(&dir, &["PING"])).unwrap();

    let mut config = test_config(&server);
    config.run.batches = 50;
    let sink = CollectingSink::new();

    let summary = run_with(&config, &corpus, &sink).await;

    assert_eq!(summary.final_state, RunState::HaltedLiveness);
    assert_eq!(summary.batches_attempted, 5);
    assert_eq!(summary.final_state.exit_code(), 1);

    let passed_checks = sink
        .events()
        .iter()
        .filter(|e| matches!(e, RunEvent::ConnectivityCheck { passed: true, .. }))
        .count();
    assert_eq!(passed_checks, 2);
}

#[tokio::test]
async fn test_server_going_away_halts_on_connectivity() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let corpus = FileCorpus::open(write_corpus(&dir, &["GET a"])).unwrap();

    let mut config = test_config(&server);
    config.run.batches = 50;
    controller(&config).preflight().await.unwrap();
    server.shutdown().await;

    let sink = CollectingSink::new();
    let summary = run_with(&config, &corpus, &sink).await;

    assert_eq!(summary.final_state, RunState::HaltedConnectivity);
    assert_eq!(summary.batches_attempted, 3);
    assert_eq!(summary.failures, 3);
    assert!(sink.outcomes().iter().all(|o| o.hard_error));
}

#[tokio::test]
async fn test_preflight_fails_without_server() {
    let server = MockServer::start().await;
    let config = test_config(&server);
    server.shutdown().await;

    let result = controller(&config).preflight().await;
    assert!(matches!(result, Err(FuzzerError::Preflight(_))));
}

#[tokio::test]
async fn test_log_sink_records_run() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let corpus = FileCorpus::open(write_corpus(&dir, &["SET a 1"])).unwrap();

    let mut config = test_config(&server);
    config.run.batches = 3;
    let logs = dir.path().join("logs");
    let sink = LogSink::create(
        &logs,
        &RunHeader {
            target: config.target.address(),
            batches: 3,
            mode: config.run.mode,
            fuzz: false,
            protocol: 2,
            corpus: "commands.txt".to_string(),
        },
    )
    .unwrap();

    let summary = run_with(&config, &corpus, &sink).await;
    assert_eq!(summary.final_state, RunState::Completed);

    let commands = std::fs::read_to_string(&sink.paths().commands).unwrap();
    assert_eq!(commands.lines().count(), 3);
    let errors = std::fs::read_to_string(&sink.paths().errors).unwrap();
    assert!(errors.is_empty());
    let text = std::fs::read_to_string(&sink.paths().summary).unwrap();
    assert!(text.contains("final state:        COMPLETED"));
}

fn fuzzer_binary(args: Vec<String>) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_ferrite-fuzzer"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("should run ferrite-fuzzer")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binary_exit_codes() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let corpus = write_corpus(&dir, &["SET a 1", "GET a"]);
    let logs = dir.path().join("logs");

    let args = |target: String| {
        vec![
            target,
            "3".to_string(),
            "--commands-file".to_string(),
            corpus.display().to_string(),
            "--log-dir".to_string(),
            logs.display().to_string(),
            "--set".to_string(),
            "pacing.min_delay_ms=0".to_string(),
            "--set".to_string(),
            "pacing.max_delay_ms=0".to_string(),
            "--set".to_string(),
            "timeouts.preflight_ms=500".to_string(),
        ]
    };

    let ok_args = args(server.address());
    let output = tokio::task::spawn_blocking(move || fuzzer_binary(ok_args))
        .await
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("COMPLETED"));

    let down_args = args(server.address());
    server.shutdown().await;
    let output = tokio::task::spawn_blocking(move || fuzzer_binary(down_args))
        .await
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binary_sigterm_interrupts_with_summary() {
    use std::process::Stdio;

    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let corpus = write_corpus(&dir, &["SET a 1"]);
    let logs = dir.path().join("logs");

    let child = Command::new(env!("CARGO_BIN_EXE_ferrite-fuzzer"))
        .args([
            server.address(),
            "100000".to_string(),
            "--commands-file".to_string(),
            corpus.display().to_string(),
            "--log-dir".to_string(),
            logs.display().to_string(),
            "--set".to_string(),
            "pacing.min_delay_ms=20".to_string(),
            "--set".to_string(),
            "pacing.max_delay_ms=20".to_string(),
        ])
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("should spawn ferrite-fuzzer");

    // Wait for a few batches so the run loop is underway
    wait_until(|| server.verbs().iter().filter(|v| *v == "ECHO").count() >= 3).await;

    let status = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .expect("should run kill");
    assert!(status.success());

    let output = tokio::task::spawn_blocking(move || child.wait_with_output())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output.status.code(), Some(130));
    assert!(String::from_utf8_lossy(&output.stdout).contains("INTERRUPTED"));

    let summary = std::fs::read_dir(&logs)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_name().to_string_lossy().starts_with("fuzzer-summary-"))
        .expect("summary log should exist");
    let text = std::fs::read_to_string(summary.path()).unwrap();
    assert!(text.contains("INTERRUPTED"));
}

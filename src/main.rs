//! ferrite-fuzzer - protocol-level command fuzzer for RESP servers
//!
//! Entry point: parses the command line, loads configuration, runs the
//! preflight check and the batch loop, and prints the run summary.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::{ArgAction, Parser};
use colored::Colorize;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use ferrite_fuzzer::batch::{BatchBuilder, ExecutionMode};
use ferrite_fuzzer::config::{FuzzerConfig, LoggingConfig, TargetConfig};
use ferrite_fuzzer::controller::{Controller, RunEvent, RunSettings, RunState, RunSummary};
use ferrite_fuzzer::corpus::{FileCorpus, Sampler};
use ferrite_fuzzer::executor::Executor;
use ferrite_fuzzer::report::{resolve_log_dir, LogPaths, LogSink, OutcomeSink, RunHeader};
use ferrite_fuzzer::transport::TcpConnector;

/// ferrite-fuzzer - protocol-level command fuzzer for Ferrite and Redis
///
/// Sends batches of (optionally mutated) commands from a corpus file and
/// halts when the server stops answering liveness checks.
#[derive(Parser, Debug)]
#[command(name = "ferrite-fuzzer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Target server as HOST:PORT (overrides config file)
    #[arg(value_name = "HOST:PORT")]
    target: Option<String>,

    /// Number of batches to run (overrides config file)
    #[arg(value_name = "NUM_BATCHES", value_parser = clap::value_parser!(u64).range(1..))]
    batches: Option<u64>,

    /// File with one command per line
    #[arg(
        short = 'f',
        long = "commands-file",
        value_name = "FILE",
        env = "FERRITE_FUZZER_COMMANDS"
    )]
    commands_file: Option<PathBuf>,

    /// Mutate commands before sending them
    #[arg(long = "fuzz", action = ArgAction::SetTrue)]
    fuzz: bool,

    /// Send each batch as a single pipelined write
    #[arg(long = "pipeline", action = ArgAction::SetTrue)]
    pipeline: bool,

    /// Speak RESP2 (no handshake)
    #[arg(long = "resp2", action = ArgAction::SetTrue, conflicts_with = "resp3")]
    resp2: bool,

    /// Negotiate RESP3 with HELLO 3
    #[arg(long = "resp3", action = ArgAction::SetTrue)]
    resp3: bool,

    /// Log every batch and enable debug output
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    verbose: bool,

    /// Path to configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for the run's log files
    #[arg(long = "log-dir", value_name = "DIR", env = "FERRITE_FUZZER_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error (overrides config file)
    #[arg(
        short = 'l',
        long = "log-level",
        value_name = "LEVEL",
        env = "FERRITE_FUZZER_LOG_LEVEL"
    )]
    log_level: Option<String>,

    /// Console log format
    #[arg(long = "log-format", value_name = "FORMAT", value_parser = ["pretty", "json"])]
    log_format: Option<String>,

    /// Runtime config overrides in key=value format (can be specified multiple times)
    #[arg(long = "set", value_name = "KEY=VALUE", action = ArgAction::Append)]
    config_overrides: Vec<String>,
}

impl Cli {
    /// Apply CLI arguments on top of the loaded configuration
    fn apply_to_config(&self, config: &mut FuzzerConfig) -> ferrite_fuzzer::Result<()> {
        for assignment in &self.config_overrides {
            config.apply_override(assignment)?;
        }

        if let Some(ref target) = self.target {
            let (host, port) = TargetConfig::parse_address(target)?;
            config.target.host = host;
            config.target.port = port;
        }
        if let Some(batches) = self.batches {
            config.run.batches = batches;
        }
        if let Some(ref path) = self.commands_file {
            config.corpus.path = Some(path.clone());
        }
        if self.fuzz {
            config.run.fuzz = true;
        }
        if self.pipeline {
            config.run.mode = ExecutionMode::Pipelined;
        }
        if self.resp2 {
            config.target.protocol = 2;
        }
        if self.resp3 {
            config.target.protocol = 3;
        }
        if let Some(ref dir) = self.log_dir {
            config.logging.dir = Some(dir.clone());
        }
        if let Some(ref format) = self.log_format {
            config.apply_override(&format!("logging.format={}", format))?;
        }
        match self.log_level {
            Some(ref level) => config.logging.level = level.clone(),
            None if self.verbose => config.logging.level = "debug".to_string(),
            None => {}
        }
        Ok(())
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<FuzzerConfig> {
    let mut config = match cli.config {
        Some(ref path) => FuzzerConfig::from_file(path)?,
        None => FuzzerConfig::default(),
    };
    cli.apply_to_config(&mut config)?;
    config.validate()?;
    Ok(config)
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        ferrite_fuzzer::config::LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        ferrite_fuzzer::config::LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(&cli)?;
    init_logging(&config.logging);

    let corpus_path = config
        .corpus
        .path
        .clone()
        .ok_or_else(|| anyhow!("no command corpus given; pass --commands-file FILE"))?;
    let corpus = FileCorpus::open(&corpus_path)?;
    let protocol = config.target.protocol_version()?;
    let target = config.target.address();

    let log_dir = resolve_log_dir(config.logging.dir.as_deref());
    let header = RunHeader {
        target: target.clone(),
        batches: config.run.batches,
        mode: config.run.mode,
        fuzz: config.run.fuzz,
        protocol: protocol.version_number(),
        corpus: corpus_path.display().to_string(),
    };
    let sink = LogSink::create(&log_dir, &header)
        .with_context(|| format!("failed to create log files in {}", log_dir.display()))?;

    info!(
        target = %target,
        batches = config.run.batches,
        mode = %config.run.mode,
        fuzz = config.run.fuzz,
        protocol = protocol.version_number(),
        corpus = %corpus_path.display(),
        log_dir = %log_dir.display(),
        "ferrite-fuzzer v{}",
        env!("CARGO_PKG_VERSION")
    );

    let executor = Executor::new(
        TcpConnector::new(target, protocol),
        config.timeouts.batch(),
        config.pacing,
    );
    let controller = Controller::new(
        executor,
        RunSettings {
            batches: config.run.batches,
            max_batch_size: config.run.max_batch_size,
            resilience: config.resilience,
            probe_timeout: config.timeouts.probe(),
            preflight_timeout: config.timeouts.preflight(),
            verbose: cli.verbose,
        },
    );

    // Installed before preflight so a signal never kills the run without a
    // summary; the loop picks it up before the first batch.
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    spawn_shutdown_listener(shutdown_tx)?;

    if let Err(e) = controller.preflight().await {
        error!(error = %e, "preflight check failed");
        if let Err(report) = sink.record_event(&RunEvent::PreflightFailed {
            detail: e.to_string(),
        }) {
            warn!(error = %report, "failed to record preflight failure");
        }
        print_log_paths(sink.paths());
        return Err(e.into());
    }

    let sampler = Sampler::new(config.corpus.max_attempts, &config.corpus.fallback);
    let builder = BatchBuilder::new(&corpus, sampler, config.run.fuzz, config.run.mode);
    let mut rng = StdRng::from_entropy();

    let summary = controller
        .run(&builder, &sink, &mut rng, &mut shutdown_rx)
        .await;

    print_summary(&summary);
    print_log_paths(sink.paths());
    Ok(ExitCode::from(summary.final_state.exit_code()))
}

/// Feed SIGINT and, on Unix, SIGTERM into the shutdown channel.
fn spawn_shutdown_listener(shutdown: broadcast::Sender<()>) -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        let interrupt = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };
        #[cfg(unix)]
        let terminated = terminate.recv();
        #[cfg(not(unix))]
        let terminated = std::future::pending::<Option<()>>();

        let signal = tokio::select! {
            _ = interrupt => "SIGINT",
            _ = terminated => "SIGTERM",
        };
        warn!(signal, "stopping after the current batch");
        let _ = shutdown.send(());
    });
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let state = match summary.final_state {
        RunState::Completed => summary.final_state.to_string().green().bold(),
        RunState::Interrupted => summary.final_state.to_string().yellow().bold(),
        _ => summary.final_state.to_string().red().bold(),
    };
    let rate = format!("{:.2}%", summary.failure_rate);
    let rate = if summary.failures == 0 {
        rate.green()
    } else {
        rate.yellow()
    };

    println!();
    println!("{}", "Fuzzing run summary".bold());
    println!("  Target:             {}", summary.target);
    println!(
        "  Mode:               {}{}",
        summary.mode,
        if summary.fuzz { " (fuzzing)" } else { "" }
    );
    println!("  Final state:        {}", state);
    println!(
        "  Batches:            {} of {}",
        summary.batches_attempted, summary.batches_requested
    );
    println!("  Successful:         {}", summary.successes.to_string().green());
    println!("  Failed:             {}", summary.failures.to_string().red());
    println!("  Failure rate:       {}", rate);
    if let Some(ref reason) = summary.halt_reason {
        println!("  Halt reason:        {}", reason.red());
    }
    println!(
        "  Duration:           {:.1}s",
        summary.duration_ms as f64 / 1000.0
    );
}

fn print_log_paths(paths: &LogPaths) {
    println!("{}", "Log files".bold());
    println!("  Commands:           {}", paths.commands.display());
    println!("  Errors:             {}", paths.errors.display());
    println!("  Summary:            {}", paths.summary.display());
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

//! Recordroom agent - records a process's output into a Recordroom timeline.
//!
//! `app 2>&1 | recordroom-agent --api-base http://localhost:8080`

use anyhow::{Context, Result};
use clap::Parser;
use recordroom_agent::config::AgentConfig;
use recordroom_agent::logging::{self, LogConfig, LogFormat};
use recordroom_agent::pipe::{parse_console_level, pipe_lines};
use recordroom_core::Recorder;
use recordroom_types::ConsoleLevel;
use std::path::PathBuf;
use tokio::io::BufReader;

/// Recordroom agent - pipe stdin into a Recordroom record.
#[derive(Parser, Debug)]
#[command(name = "recordroom-agent")]
#[command(about = "Record piped output as Recordroom console events")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend base URL (overrides config)
    #[arg(long, value_name = "URL")]
    api_base: Option<String>,

    /// Attach to this record instead of the stored one
    #[arg(long, value_name = "ID")]
    record_id: Option<String>,

    /// Start a new record chained to the stored one
    #[arg(long)]
    new_record: bool,

    /// SQLite file for the session and record ids
    #[arg(long, value_name = "FILE")]
    storage: Option<PathBuf>,

    /// Console level for piped lines
    #[arg(long, value_name = "LEVEL", default_value = "log", value_parser = parse_console_level)]
    level: ConsoleLevel,

    /// Do not copy input to stdout
    #[arg(long)]
    no_echo: bool,

    /// How long to wait for queued events after input ends
    #[arg(long, value_name = "MS")]
    flush_timeout_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (TRACE level for everything)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "transport=debug").
    /// Can be specified multiple times. Targets are prefixed with "recordroom::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AgentConfig::load_from(path)?,
        None => AgentConfig::load()?,
    };

    if let Some(api_base) = cli.api_base {
        config.recorder.api_base = api_base;
    }
    if let Some(record_id) = cli.record_id {
        config.recorder.record_id = Some(record_id);
    }
    if cli.new_record {
        config.recorder.reuse_record_in_session = false;
    }
    if let Some(storage) = cli.storage {
        config.recorder.storage_path = Some(storage);
    }
    if let Some(timeout) = cli.flush_timeout_ms {
        config.flush_timeout_ms = timeout;
    }
    if cli.no_echo {
        config.echo = false;
    }

    let recorder = Recorder::new(&config.recorder).context("failed to build recorder")?;

    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config, Some(recorder.console_layer()));

    tracing::info!(target: "recordroom::startup", "Recording to {}", config.recorder.api_base);

    let state = recorder.start().await.context("failed to start recording")?;
    if let Some(share_url) = &state.share_url {
        eprintln!("recordroom: {}", share_url);
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let echo = config.echo.then(tokio::io::stdout);
    tokio::select! {
        piped = pipe_lines(stdin, echo, recorder.console(), cli.level) => {
            let lines = piped?;
            tracing::info!(target: "recordroom_agent", "Input closed after {} lines", lines);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(target: "recordroom_agent", "Interrupted");
        }
    }

    if !recorder.flush(config.flush_timeout()).await {
        tracing::warn!(
            target: "recordroom_agent",
            "{} events were not delivered before the flush timeout",
            recorder.state().queued
        );
    }
    recorder.shutdown().await;

    Ok(())
}

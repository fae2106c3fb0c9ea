//! Flowtrace CLI - replay recorded workflow event streams

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde_json::json;

use flowtrace::error::{FixSuggestion, FlowtraceError, Result};
use flowtrace::event::{read_trace, WorkflowEvent};
use flowtrace::ir::WorkflowIr;
use flowtrace::live::{create_live_session, PublishSink, SessionStatus};
use flowtrace::{FlowtraceConfig, TimeTravelRecorder, TraceBuilder};

#[derive(Parser)]
#[command(name = "flowtrace")]
#[command(about = "Flowtrace - live execution traces for workflow event streams")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fold a trace file and print the final IR
    Replay {
        /// Path to an NDJSON event file
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,
    },

    /// List per-event snapshots, or print one
    Snapshots {
        /// Path to an NDJSON event file
        file: PathBuf,

        /// Print the IR at this snapshot position
        #[arg(long)]
        at: Option<usize>,
    },

    /// Replay a trace file through a live session, publishing to stdout
    Live {
        /// Path to an NDJSON event file
        file: PathBuf,

        /// Title passed to the sink
        #[arg(long)]
        title: Option<String>,

        /// Quiet period before a flush (ms)
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Upper bound between flushes under continuous updates (ms)
        #[arg(long)]
        max_wait_ms: Option<u64>,

        /// Replay speed multiplier applied to gaps between event timestamps
        #[arg(long, default_value = "1.0")]
        speed: f64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries IR output only
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Replay { file, format } => replay(&file, format),
        Commands::Snapshots { file, at } => snapshots(&file, at),
        Commands::Live {
            file,
            title,
            debounce_ms,
            max_wait_ms,
            speed,
        } => live(&file, title, debounce_ms, max_wait_ms, speed).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn load_events(file: &Path) -> Result<Vec<WorkflowEvent>> {
    let events = read_trace(file)?;
    if events.is_empty() {
        return Err(FlowtraceError::EmptyTrace);
    }
    Ok(events)
}

fn replay(file: &Path, format: OutputFormat) -> Result<()> {
    let events = load_events(file)?;

    let mut builder = TraceBuilder::new();
    for event in &events {
        builder.handle_event(event);
    }
    let ir = builder.ir();

    match format {
        OutputFormat::Json => println!("{}", ir.to_json_string_safe(true)),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&ir.to_json_safe())?),
    }
    Ok(())
}

fn snapshots(file: &Path, at: Option<usize>) -> Result<()> {
    let events = load_events(file)?;
    let config = FlowtraceConfig::load()?;

    let mut recorder = match config.max_snapshots() {
        Some(max) => TimeTravelRecorder::with_max_snapshots(max),
        None => TimeTravelRecorder::new(),
    };
    for event in &events {
        recorder.handle_event(event);
    }

    if let Some(index) = at {
        let snapshot = recorder.seek(index)?;
        println!("{}", snapshot.ir.to_json_string_safe(true));
        return Ok(());
    }

    println!("Recorded {} snapshots:\n", recorder.snapshots().len());
    println!(
        "{:>5} {:>14} {:<26} {:>6} {:<10}",
        "#", "TS", "EVENT", "NODES", "STATE"
    );
    println!("{}", "-".repeat(65));
    for (pos, snapshot) in recorder.snapshots().iter().enumerate() {
        let state = format!("{:?}", snapshot.ir.state()).to_lowercase();
        println!(
            "{:>5} {:>14} {:<26} {:>6} {:<10}",
            pos,
            snapshot.ts,
            snapshot.event_type.cyan(),
            snapshot.ir.node_count(),
            state
        );
    }
    Ok(())
}

async fn live(
    file: &Path,
    title: Option<String>,
    debounce_ms: Option<u64>,
    max_wait_ms: Option<u64>,
    speed: f64,
) -> Result<()> {
    if !(speed.is_finite() && speed > 0.0) {
        return Err(FlowtraceError::InvalidConfig {
            message: format!("speed must be a positive number, got {}", speed),
        });
    }
    let events = load_events(file)?;

    // CLI > env > file > defaults
    let config = FlowtraceConfig::load()?.with_env()?;
    let mut options = config.live_options();
    if let Some(title) = title {
        options.title = title;
    } else if config.live.title.is_none() {
        options.title = events[0].workflow_id.clone();
    }
    if let Some(ms) = debounce_ms {
        options.debounce_ms = ms;
    }
    if let Some(ms) = max_wait_ms {
        options.max_wait_ms = ms;
    }

    let session = create_live_session(options, Arc::new(StdoutSink))?;

    let mut previous_ts = events[0].ts;
    for event in events {
        let gap = event.ts.saturating_sub(previous_ts);
        previous_ts = event.ts;
        if gap > 0 {
            tokio::time::sleep(Duration::from_secs_f64(gap as f64 / 1000.0 / speed)).await;
        }
        session.update(event);
    }

    let status = SessionStatus::from_state(session.ir().state());
    let result = session.finalize(status).await;
    tracing::info!(result = result.code(), status = %status, "Replay finished");
    Ok(())
}

/// Prints every publish as one JSON line
struct StdoutSink;

impl StdoutSink {
    fn print(op: &str, session_id: Option<&str>, ir: &WorkflowIr, title: &str, extra: serde_json::Value) {
        let mut line = json!({
            "op": op,
            "sessionId": session_id,
            "title": title,
            "nodes": ir.node_count(),
            "ir": ir.to_json_safe(),
        });
        if let (Some(line), serde_json::Value::Object(extra)) = (line.as_object_mut(), extra) {
            line.extend(extra);
        }
        println!("{}", line);
    }
}

#[async_trait]
impl PublishSink for StdoutSink {
    async fn post_new(&self, ir: &WorkflowIr, title: &str) -> anyhow::Result<Option<String>> {
        let session_id = format!("stdout-{}", uuid::Uuid::new_v4());
        Self::print("postNew", Some(&session_id), ir, title, json!({}));
        Ok(Some(session_id))
    }

    async fn update_existing(
        &self,
        session_id: &str,
        ir: &WorkflowIr,
        title: &str,
    ) -> anyhow::Result<()> {
        Self::print("updateExisting", Some(session_id), ir, title, json!({}));
        Ok(())
    }

    async fn finalize(
        &self,
        session_id: Option<&str>,
        ir: &WorkflowIr,
        title: &str,
        status: SessionStatus,
    ) -> anyhow::Result<()> {
        Self::print("finalize", session_id, ir, title, json!({ "status": status }));
        Ok(())
    }
}

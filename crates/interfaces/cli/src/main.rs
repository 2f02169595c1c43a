//! Minimal text-channel host process (§1 Non-goals: channel adapters and
//! concrete LLM HTTP clients are out of scope for the core; this binary
//! exists only to exercise the pipeline end-to-end from a terminal).

mod echo_provider;

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use soma_agent::SystemClock;
use soma_config::AppConfig;
use soma_exec::ContainerManager;
use soma_runtime::Orchestrator;

use echo_provider::EchoProvider;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Parser)]
#[command(name = "soma", version, about = "Autonomic agent runtime — demo host process")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Read lines from stdin as user messages, ticking the orchestrator
    /// after each one, until EOF.
    Run {
        #[arg(long, default_value = "cli-user")]
        recipient: String,
    },
    /// Run exactly one tick with no new input (lets due schedules, energy
    /// gating, and deferred signals drive the pipeline on their own).
    Tick,
    /// Inspect persisted schedules.
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
    /// Inspect the memory provider.
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    /// Sandbox container maintenance.
    Container {
        #[command(subcommand)]
        command: ContainerCommands,
    },
}

#[derive(Debug, Subcommand)]
enum ScheduleCommands {
    List,
}

#[derive(Debug, Subcommand)]
enum MemoryCommands {
    Stats,
}

#[derive(Debug, Subcommand)]
enum ContainerCommands {
    /// Remove tracked and orphaned sandbox containers/volumes older than
    /// `--max-age-secs` (§4.9 `prune`).
    Prune {
        #[arg(long, default_value_t = 3600)]
        max_age_secs: u64,
    },
    /// Tear down every tracked sandbox container immediately (§4.9
    /// `destroyAll`).
    DestroyAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;
    if !Path::new(&cli.config).exists() {
        tracing::info!(path = %cli.config, "no config file found, running with defaults");
    }

    match cli.command.unwrap_or(Commands::Run { recipient: "cli-user".to_string() }) {
        Commands::Run { recipient } => run_session(config, recipient).await,
        Commands::Tick => run_single_tick(config).await,
        Commands::Schedule { command: ScheduleCommands::List } => list_schedules(config).await,
        Commands::Memory { command: MemoryCommands::Stats } => memory_stats(config).await,
        Commands::Container { command } => container_command(config, command).await,
    }
}

async fn build_orchestrator(config: AppConfig) -> Result<Orchestrator> {
    let llm = Arc::new(EchoProvider::new(config.identity.name.clone()));
    let clock = Arc::new(SystemClock);
    Orchestrator::new(config, llm, clock).await
}

/// Interactive loop: every stdin line becomes a `user_message` signal; the
/// orchestrator ticks immediately afterward and any outbound messages are
/// printed. Mirrors the teacher's line-mode fallback for non-tty stdin,
/// generalized to be the only mode this host offers (no TUI — Non-goal).
async fn run_session(config: AppConfig, recipient: String) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    println!("{}", "soma is online. Type a message and press enter; Ctrl-D to quit.");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let now = chrono::Utc::now();
        let signal = soma_core::Signal::new(
            soma_core::SignalKind::UserMessage,
            "cli",
            soma_core::Priority::High,
            soma_core::Metrics::new(1.0),
            now,
        )
        .with_data(soma_core::SignalData::UserMessage { text: line, channel: "cli".to_string(), recipient: recipient.clone() });
        orchestrator.ingest(signal);

        let report = orchestrator.tick().await?;
        tracing::debug!(?report, "tick complete");

        for message in orchestrator.drain_outbound() {
            println!("{}: {}", message.recipient, message.text);
            io::stdout().flush().ok();
        }
    }

    Ok(())
}

async fn run_single_tick(config: AppConfig) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let report = orchestrator.tick().await?;
    println!(
        "tick {} — signals={} woke={} reason={:?} intents={}",
        report.tick_id, report.signals_processed, report.woke, report.wake_reason, report.intents_applied
    );
    for message in orchestrator.drain_outbound() {
        println!("{}: {}", message.recipient, message.text);
    }
    Ok(())
}

async fn list_schedules(config: AppConfig) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let schedules = orchestrator.schedule_snapshot().await;
    if schedules.is_empty() {
        println!("(no schedules)");
        return Ok(());
    }
    for entry in schedules {
        println!("{} owner={} next_fire_at={} fire_count={}", entry.id, entry.owner, entry.next_fire_at, entry.fire_count);
    }
    Ok(())
}

async fn memory_stats(config: AppConfig) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    println!("memory entries: {}", orchestrator.memory_entry_count().await);
    println!("energy: {:.3}", orchestrator.energy_value());
    Ok(())
}

async fn container_command(config: AppConfig, command: ContainerCommands) -> Result<()> {
    let manager = ContainerManager::new(config.container.clone());
    match command {
        ContainerCommands::Prune { max_age_secs } => {
            let removed = manager.prune(Duration::from_secs(max_age_secs)).await?;
            println!("pruned {removed} container(s)/volume(s)");
        }
        ContainerCommands::DestroyAll => {
            manager.destroy_all().await?;
            println!("destroyed all tracked sandbox containers");
        }
    }
    Ok(())
}

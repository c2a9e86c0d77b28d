//! `noetic` — run a reasoning session from the command line.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use noetic_config::SessionConfig;
use noetic_engine::agents::{AgentRunner, Proposal, Role};
use noetic_engine::blackboard::Snapshot;
use noetic_engine::events::Event;
use noetic_engine::persistence::InMemoryStore;
use noetic_engine::registry::SessionRegistry;
use noetic_engine::runner::RunnerState;
use noetic_engine::trajectory::HashEmbedder;
use noetic_otel::LogFormat;

/// Always-crashes stand-in for a real language-model client. Wiring an
/// actual `AgentRunner` (an HTTP client against a model provider) is a
/// deployment concern outside this crate; this keeps the binary runnable
/// end to end without one.
struct NullAgentRunner;

#[async_trait]
impl AgentRunner for NullAgentRunner {
    async fn run(&self, role: Role, _snapshot: &Snapshot, _model: &str) -> Result<Proposal, String> {
        Err(format!("no agent runner configured for role {role}"))
    }
}

#[derive(Parser)]
#[command(name = "noetic", version, about = "Multi-agent reasoning session engine")]
struct Cli {
    /// Emit logs as JSON instead of the default pretty format.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a session and drive it to completion in this process,
    /// printing each cycle's outcome to stdout.
    Run {
        /// Path to a TOML session config. Omit to build one from flags.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Initial claim; required when `--config` is omitted.
        #[arg(long)]
        seed_claim: Option<String>,

        /// Override the config's max_cycles.
        #[arg(long)]
        max_cycles: Option<u64>,
    },
    /// Parse and validate a session config file without running anything.
    ValidateConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>, seed_claim: Option<String>, max_cycles: Option<u64>) -> anyhow::Result<SessionConfig> {
    let mut config = match path {
        Some(p) => SessionConfig::load_from_file(p)?,
        None => SessionConfig::default(),
    };
    if let Some(seed) = seed_claim {
        config.seed_claim = seed;
    }
    if let Some(n) = max_cycles {
        config.max_cycles = n;
    }
    config.apply_env_overrides();
    let violations = config.validate();
    if !violations.is_empty() {
        anyhow::bail!("invalid configuration: {violations:?}");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = if cli.json_logs { LogFormat::Json } else { LogFormat::Pretty };
    if let Err(e) = noetic_otel::init_tracing(format) {
        eprintln!("warning: failed to initialize tracing: {e}");
    }

    match cli.command {
        Command::ValidateConfig { config } => {
            match load_config(Some(&config), None, None) {
                Ok(_) => println!("configuration is valid"),
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        Command::Run { config, seed_claim, max_cycles } => {
            let session_config = load_config(config.as_ref(), seed_claim, max_cycles)?;
            run_session(session_config).await
        }
    }
}

async fn run_session(config: SessionConfig) -> anyhow::Result<()> {
    let registry = SessionRegistry::new(
        Arc::new(noetic_engine::trajectory::TrajectoryStore::new(HashEmbedder::default())),
        Arc::new(NullAgentRunner),
        Arc::new(InMemoryStore::new()),
        Arc::new(noetic_engine::events::EventBus::new()),
    );
    // Subscribing happens before `start_session` allocates the id, so the
    // event bus topic must be derived the same way the registry derives it
    // internally. Subscribe to the aggregate `sessions` topic instead and
    // filter by id once it's known.
    let mut events = registry.event_bus().subscribe("sessions");
    let session_id = registry.start_session(config).await?;

    loop {
        match events.recv().await {
            Ok(Event::CycleComplete { cycle, support, current_claim, .. }) => {
                println!(
                    "cycle {cycle}: support={support:.3} claim={}",
                    current_claim.as_deref().unwrap_or("<none>")
                );
            }
            Ok(Event::SessionCompleted { reason, .. }) => {
                println!("session {session_id} completed: {reason}");
                break;
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event receiver lagged; some cycle events were dropped");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    let info = registry.get_info(&session_id).await?;
    if !matches!(info.state, RunnerState::Completed) {
        anyhow::bail!("session ended in unexpected state: {:?}", info.state);
    }
    Ok(())
}

//! ringd — the Ringleader daemon.
//!
//! Single binary that assembles the whole orchestrator:
//! - State store (redb)
//! - Device registry + ring balancer
//! - Task scheduler with liveness monitors
//! - Deployment scheduler with threshold gating
//! - Simulated device agents
//!
//! # Usage
//!
//! ```text
//! ringd standalone --data-dir /var/lib/ringleader --agents 8
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod config;
mod standalone;

use config::OrchestratorConfig;

#[derive(Parser)]
#[command(name = "ringd", about = "Ringleader deployment orchestrator daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run master, agents, and all background loops in one process.
    Standalone {
        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/ringleader")]
        data_dir: PathBuf,

        /// Optional TOML config file; flags below override it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of simulated device agents.
        #[arg(long)]
        agents: Option<usize>,

        /// Ring dwell time in seconds before gating.
        #[arg(long)]
        dwell_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ringd=debug,ringleader=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            data_dir,
            config,
            agents,
            dwell_secs,
        } => {
            let mut config = match config {
                Some(path) => OrchestratorConfig::load(&path)?,
                None => OrchestratorConfig::default(),
            };
            if let Some(agents) = agents {
                config.agents = agents;
            }
            if let Some(dwell_secs) = dwell_secs {
                config.dwell_secs = dwell_secs;
            }
            standalone::run(config, data_dir).await
        }
    }
}

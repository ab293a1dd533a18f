// CLI module - runs a supervisor over a configuration document

mod output;

use crate::config::ConfigDocument;
use crate::process::{Supervisor, SupervisorEvent};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Tend - a small supervisor that keeps processes running
#[derive(Parser, Debug)]
#[command(name = "tend")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start every process in the config and supervise until interrupted
    Run {
        /// Path to a TOML or JSON config file
        config: PathBuf,
    },

    /// Load and validate a config file without starting anything
    Check {
        /// Path to a TOML or JSON config file
        config: PathBuf,
    },
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> anyhow::Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    fn execute(&self) -> anyhow::Result<()> {
        init_tracing(&self.log_level);

        match &self.command {
            Commands::Check { config } => {
                let document = load(config)?;
                output::print_spec_table(&document.specs());
                output::print_success_msg(&format!("{} is valid", config.display()));
                Ok(())
            }
            Commands::Run { config } => {
                let document = load(config)?;
                let runtime = tokio::runtime::Runtime::new()
                    .context("failed to start the tokio runtime")?;
                runtime.block_on(supervise(document))
            }
        }
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // A subscriber may already be installed when embedded
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn load(path: &Path) -> anyhow::Result<ConfigDocument> {
    ConfigDocument::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

async fn supervise(document: ConfigDocument) -> anyhow::Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    let supervisor = Supervisor::init(document.supervisor.clone());
    let mut events = supervisor.subscribe();

    let mut started = 0;
    for (name, result) in supervisor.start_all(document.specs()).await {
        match result {
            Ok(pid) => {
                started += 1;
                output::print_success_msg(&format!("{} started (pid {})", name, pid));
            }
            Err(e) => output::print_error(&format!("{}: {}", name, e)),
        }
    }
    output::print_info(&format!(
        "supervising {} of {} process(es), press Ctrl+C to stop",
        started,
        document.processes.len()
    ));

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM");
                break;
            }
            _ = sigint.recv() => {
                tracing::info!("received SIGINT");
                break;
            }
            event = events.recv() => match event {
                Ok(SupervisorEvent::GaveUp { name, reason }) => {
                    output::print_error(&format!("{} gave up: {}", name, reason));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let statuses = supervisor.list().await?;
    output::print_process_table(&statuses);

    supervisor.shutdown().await?;
    output::print_success_msg("all processes stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from(["tend", "run", "tend.toml"]).unwrap();
        assert_eq!(cli.log_level, "info");
        match cli.command {
            Commands::Run { config } => assert_eq!(config, PathBuf::from("tend.toml")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_log_level() {
        let cli = Cli::try_parse_from(["tend", "check", "tend.json", "--log-level", "debug"])
            .unwrap();
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Check { .. }));
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["tend", "run"]).is_err());
    }
}

//! Respawn CLI - self-update pipeline for a running bot.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use respawn_core::{RespawnConfig, UpdateError};
use respawn_git::{GitCommand, Transports};
use respawn_orchestrator::{Reporter, RunOutcome, TracingReporter, UpdateCommand, UpdateOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "respawn")]
#[command(about = "Respawn - pull, build and install a bot from its own repository", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "respawn.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one update and exit
    Update {
        /// Branch to build (defaults to repository.default_branch)
        branch: Option<String>,

        /// Print the run outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read chat commands from stdin, one per line
    Listen,

    /// Load and validate the configuration
    CheckConfig,
}

/// Reporter that prints chat messages to stdout
struct StdoutReporter;

#[async_trait]
impl Reporter for StdoutReporter {
    async fn report(&self, message: &str) {
        println!("{}", message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = RespawnConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Update { branch, json } => {
            let branch = branch.unwrap_or_else(|| config.repository.default_branch.clone());
            let reporter: Arc<dyn Reporter> = if json {
                Arc::new(TracingReporter)
            } else {
                Arc::new(StdoutReporter)
            };
            let orchestrator = UpdateOrchestrator::with_git(config, reporter);
            let outcome = orchestrator.execute(&branch).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
            if !outcome.is_done() {
                std::process::exit(1);
            }
        }

        Commands::Listen => listen(config).await?,

        Commands::CheckConfig => check_config(&cli.config, &config).await?,
    }

    Ok(())
}

/// Dispatch `update` commands from stdin until EOF
async fn listen(config: RespawnConfig) -> Result<()> {
    let default_branch = config.repository.default_branch.clone();
    let reporter: Arc<dyn Reporter> = Arc::new(StdoutReporter);
    let orchestrator = Arc::new(UpdateOrchestrator::with_git(config, reporter.clone()));

    info!("Listening for update commands on stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut runs = Vec::new();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let Some(command) = UpdateCommand::parse(&line, &default_branch) else {
            debug!("Ignoring: {}", line);
            continue;
        };

        match orchestrator.clone().spawn(&command.branch) {
            Ok(handle) => {
                prune_finished(&mut runs);
                runs.push(handle);
            }
            Err(e @ UpdateError::AlreadyRunning { .. }) => {
                reporter
                    .report("An update is already running, try again when it finishes.")
                    .await;
                debug!("{}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    for run in runs {
        let outcome: RunOutcome = run.await.context("Update task panicked")?;
        debug!("Run {} finished: {:?}", outcome.run_id, outcome.state);
    }
    Ok(())
}

/// Drop handles of runs that already finished
fn prune_finished<T>(runs: &mut Vec<JoinHandle<T>>) {
    runs.retain(|run| !run.is_finished());
}

/// Report what the configuration resolves to and whether it is usable
async fn check_config(path: &std::path::Path, config: &RespawnConfig) -> Result<()> {
    println!("Configuration: {}", path.display());
    println!("  remote:        {}", config.repository.remote_url);
    println!("  working copy:  {}", config.repository.local_path.display());
    println!("  credential:    {}", config.repository.credential);
    println!("  default branch {}", config.repository.default_branch);
    println!(
        "  build:         {} {} {}",
        config.build.tool,
        config.build.args.join(" "),
        config.build.goals.join(" ")
    );

    let artifacts = config.artifact_set();
    println!("  artifact:      {}", artifacts.artifact().display());
    println!("  backup:        {}", artifacts.backup().display());
    println!("  libraries:     {}", artifacts.lib_dir().display());

    if !GitCommand::is_available().await {
        warn!("git is not on PATH; updates will fail");
    }

    Transports::new(config.ssh.clone())
        .resolve(config.repository.credential)
        .context("Repository credentials are not usable")?;

    println!("Configuration OK");
    Ok(())
}

//! genchain CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "genchain")]
#[command(about = "Multi-stage image and animation generation pipeline", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for every prompt until all jobs settle
    Run {
        /// Path to the run configuration
        #[arg(short, long, default_value = "genchain.kdl")]
        config: PathBuf,
        /// Path to the JSON array of prompts
        #[arg(short, long, default_value = "prompts.json")]
        prompts: PathBuf,
        /// API token for the remote services
        #[arg(long, env = "USEAPI_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Validate a run configuration and, optionally, a prompts file
    Validate {
        /// Path to the run configuration
        #[arg(default_value = "genchain.kdl")]
        config: PathBuf,
        /// Path to the JSON array of prompts
        #[arg(long)]
        prompts: Option<PathBuf>,
    },
    /// Show a persisted job tree
    Status {
        /// Path to the state file written by `run`
        #[arg(default_value = "result.json")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Commands::Run {
            config,
            prompts,
            token,
        } => {
            commands::run::run(&config, &prompts, token).await?;
        }
        Commands::Validate { config, prompts } => {
            commands::validate(&config, prompts.as_deref())?;
        }
        Commands::Status { path } => {
            commands::status::show(&path)?;
        }
    }

    Ok(())
}

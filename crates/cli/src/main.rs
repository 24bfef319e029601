//! osbridge CLI - osb command

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use osb_core::Config;
use std::path::PathBuf;

mod cmd;

use cmd::WatchArgs;

/// osbridge - shared filesystem watches for many subscribers
#[derive(Parser)]
#[command(name = "osb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: $OSB_CONFIG or <config dir>/osbridge/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Run in foreground (for debugging)
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the daemon
    Stop,
    /// Show daemon status and the watch tree
    Status,
    /// Watch a path in this process and print its events
    Watch(WatchArgs),
    /// Watch a path through the daemon and print its events
    Subscribe(WatchArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    // Held until exit so the file appender flushes
    let _log_guard = match cli.command {
        Commands::Start { foreground: true } => {
            let logs_dir = config.daemon.state_dir().join("logs");
            Some(cli_lib::logging::init_daemon(&config.daemon.log_level, &logs_dir)?)
        }
        _ => {
            cli_lib::logging::init_cli("warn");
            None
        }
    };

    match cli.command {
        Commands::Start { foreground } => {
            cmd::start::run(config, cli.config.as_deref(), foreground).await
        }
        Commands::Stop => cmd::stop::run(config).await,
        Commands::Status => cmd::status::run(config).await,
        Commands::Watch(args) => cmd::watch::run(config, args).await,
        Commands::Subscribe(args) => cmd::subscribe::run(config, args).await,
    }
}

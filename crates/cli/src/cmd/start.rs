//! Start the osbridge daemon

use anyhow::{Context, Result};
use osb_core::Config;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

pub async fn run(config: Config, config_path: Option<&Path>, foreground: bool) -> Result<()> {
    if foreground {
        cli_lib::daemon::start(config).await
    } else {
        start_background(&config, config_path).await
    }
}

async fn start_background(config: &Config, config_path: Option<&Path>) -> Result<()> {
    let socket_path = config.daemon.socket_path();
    if cli_lib::daemon::is_running(&socket_path) {
        println!("Daemon is already running");
        return Ok(());
    }

    let logs_dir = config.daemon.state_dir().join("logs");
    std::fs::create_dir_all(&logs_dir).context("Failed to create logs directory")?;

    // Catches panics and anything written before tracing is up
    let output_path = logs_dir.join("daemon.out");
    let output = std::fs::File::create(&output_path).context("Failed to create output file")?;

    let exe = std::env::current_exe().context("Failed to get current executable path")?;
    let mut command = Command::new("nohup");
    command.arg(&exe);
    if let Some(path) = config_path {
        command.arg("--config").arg(path);
    }
    command
        .arg("start")
        .arg("--foreground")
        .stdin(Stdio::null())
        .stdout(output.try_clone()?)
        .stderr(output)
        .spawn()
        .context("Failed to spawn daemon process")?;

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if cli_lib::daemon::is_running(&socket_path) {
            println!("Daemon started successfully");
            println!("Logs: {}", logs_dir.display());
            return Ok(());
        }
    }

    anyhow::bail!(
        "Daemon failed to start (check {})",
        output_path.display()
    )
}

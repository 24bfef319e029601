//! Show daemon status and the watch tree

use anyhow::{Context, Result};
use cli_lib::ipc::IpcClient;
use cli_lib::{daemon, locks, util};
use osb_core::Config;
use owo_colors::OwoColorize;

pub async fn run(config: Config) -> Result<()> {
    let state_dir = config.daemon.state_dir();
    let socket_path = config.daemon.socket_path();

    println!("{}", "Daemon Status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("State dir:     {}", state_dir.display().to_string().cyan());

    print!("Daemon:        ");
    if !daemon::is_running(&socket_path) {
        println!("{}", "Not running".yellow());
        if let Some(owner) = locks::lock_owner(&state_dir) {
            println!(
                "  {}",
                format!("Lock file still names pid {}", owner.pid).dimmed()
            );
        }
        println!("  {}", "Tip: Start with 'osb start'".dimmed());
        return Ok(());
    }

    let mut client = IpcClient::connect(&socket_path).await?;
    let status = client
        .get_status()
        .await
        .context("Failed to query daemon status")?;

    println!("{}", "Running ✓".green());
    println!("  PID:         {}", status.pid);
    println!("  Uptime:      {}", util::format_uptime(status.uptime_secs));
    println!();
    println!("Engine:");
    println!("  Nodes:       {}", status.nodes);
    println!("  FS watches:  {}", status.fswatchers);
    println!("  Watchers:    {}", status.watchers);
    println!();

    if status.tree.is_empty() {
        println!("{}", "Nothing is being watched".dimmed());
    } else {
        println!("Tree:");
        for line in status.tree.lines() {
            println!("  {}", line);
        }
    }

    Ok(())
}

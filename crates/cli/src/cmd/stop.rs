//! Stop the osbridge daemon

use anyhow::Result;
use osb_core::Config;

pub async fn run(config: Config) -> Result<()> {
    cli_lib::daemon::stop(&config.daemon.socket_path()).await?;
    println!("Daemon stopped");
    Ok(())
}

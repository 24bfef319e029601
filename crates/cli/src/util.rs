//! Output helpers shared by the commands

use anyhow::Result;
use owo_colors::OwoColorize;
use watcher::{Action, ChangeEvent};

/// Print one change event, either as a JSON line or colored text
pub fn print_event(event: &ChangeEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let action = format!("{:<6}", event.action.to_string());
    let action = match event.action {
        Action::Add => action.green().to_string(),
        Action::Change => action.yellow().to_string(),
        Action::Delete => action.red().to_string(),
    };
    println!("{} {}", action, event.file.display());
    Ok(())
}

/// Format seconds as "3d 4h", "2h 5m", "1m 10s" or "42s"
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

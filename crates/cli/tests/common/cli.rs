//! Helpers for running the `osb` binary
//!
//! Every command gets its own config file whose state dir lives inside the
//! test's temp directory, so tests never see a real daemon.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

/// Isolated environment: config file plus state dir
pub struct OsbEnv {
    config_path: PathBuf,
    state_dir: PathBuf,
}

impl OsbEnv {
    pub fn new(root: &Path) -> Result<Self> {
        let state_dir = root.join("state");
        let config_path = root.join("config.toml");
        std::fs::write(
            &config_path,
            format!("[daemon]\nstate_dir = {:?}\n", state_dir.display().to_string()),
        )
        .context("Failed to write test config")?;
        Ok(Self {
            config_path,
            state_dir,
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Start building an `osb` invocation
    pub fn command(&self, args: &[&str]) -> OsbCommand {
        let mut command = Command::new(env!("CARGO_BIN_EXE_osb"));
        command
            .env("OSB_CONFIG", &self.config_path)
            .env_remove("RUST_LOG")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        OsbCommand {
            command,
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// One `osb` invocation
pub struct OsbCommand {
    command: Command,
    args: Vec<String>,
}

impl OsbCommand {
    pub fn execute(&mut self) -> Result<CommandResult> {
        let output = self.command.output().context("Failed to execute osb")?;
        Ok(CommandResult::from(output))
    }

    /// Execute and assert success
    pub fn assert_success(&mut self) -> Result<CommandResult> {
        let result = self.execute()?;
        if !result.success() {
            anyhow::bail!(
                "Command failed (exit code: {}):\nArgs: {:?}\nStdout: {}\nStderr: {}",
                result.exit_code,
                self.args,
                result.stdout,
                result.stderr
            );
        }
        Ok(result)
    }

    /// Execute and expect failure
    pub fn assert_failure(&mut self) -> Result<CommandResult> {
        let result = self.execute()?;
        if result.success() {
            anyhow::bail!(
                "Command should have failed but succeeded:\nArgs: {:?}\nStdout: {}",
                self.args,
                result.stdout
            );
        }
        Ok(result)
    }

    /// Start without waiting, for long-running commands
    pub fn spawn(&mut self) -> Result<RunningCommand> {
        let child = self.command.spawn().context("Failed to spawn osb")?;
        Ok(RunningCommand { child: Some(child) })
    }
}

/// A spawned `osb` process, killed on drop
pub struct RunningCommand {
    child: Option<Child>,
}

impl RunningCommand {
    /// Wait for exit, killing the process after `timeout`
    pub fn wait(mut self, timeout: Duration) -> Result<CommandResult> {
        let mut child = self.child.take().context("Process already reaped")?;
        let deadline = Instant::now() + timeout;
        while child.try_wait()?.is_none() {
            if Instant::now() >= deadline {
                child.kill().ok();
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        Ok(CommandResult::from(child.wait_with_output()?))
    }
}

impl Drop for RunningCommand {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Captured output of a finished command
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl From<Output> for CommandResult {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        }
    }
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn contains_stdout(&self, text: &str) -> bool {
        self.stdout.contains(text)
    }

    pub fn contains_stderr(&self, text: &str) -> bool {
        self.stderr.contains(text)
    }
}

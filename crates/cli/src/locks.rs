//! Single-daemon lock for a state directory

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Held for the lifetime of the daemon; removes its file on drop
pub struct DaemonLock {
    path: PathBuf,
    // Keeps the flock alive
    _file: File,
}

/// What the lock file records about its owner
#[derive(Debug, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub started_at: u64,
}

impl DaemonLock {
    /// Take the lock in `<state_dir>/locks/daemon.lock`
    ///
    /// Fails when another live process holds it. A lock left by a dead
    /// process is removed and taken over.
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        Self::acquire_at(lock_path(state_dir), true)
    }

    fn acquire_at(path: PathBuf, recover: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create locks directory")?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        if !try_flock_exclusive(&file)? {
            let owner = read_owner(&mut file).ok();
            match owner {
                Some(owner) if is_process_alive(owner.pid) => {
                    anyhow::bail!("Daemon already running (pid {})", owner.pid);
                }
                _ if recover => {
                    tracing::warn!("Removing stale daemon lock {}", path.display());
                    drop(file);
                    std::fs::remove_file(&path)?;
                    return Self::acquire_at(path, false);
                }
                _ => anyhow::bail!("Daemon lock {} is held", path.display()),
            }
        }

        write_owner(&mut file)?;
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock and remove its file
    pub fn release(self) -> Result<()> {
        std::fs::remove_file(&self.path).context("Failed to remove lock file")?;
        Ok(())
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        // Already gone after release()
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Read the owner of the lock in `state_dir`, if any
pub fn lock_owner(state_dir: &Path) -> Option<LockOwner> {
    let mut file = File::open(lock_path(state_dir)).ok()?;
    read_owner(&mut file).ok()
}

fn lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join("locks").join("daemon.lock")
}

fn write_owner(file: &mut File) -> Result<()> {
    let owner = LockOwner {
        pid: std::process::id(),
        started_at: current_timestamp_ms(),
    };
    let serialized = serde_json::to_string(&owner).context("Failed to serialize lock owner")?;

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(serialized.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn read_owner(file: &mut File) -> Result<LockOwner> {
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).context("Failed to parse lock owner")
}

fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Send the null signal; EPERM still means the process exists
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(_) => true,
    }
}

fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

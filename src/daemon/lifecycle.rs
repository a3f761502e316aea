// PID file for the running daemon
//
// Written once the daemon has bound its port and reached the bucket, removed
// on a clean exit. A second launch on the same state directory reads it to
// refuse starting twice.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record this process as the daemon, creating the state directory
    pub fn claim(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let pid = std::process::id();
        fs::write(&self.path, format!("{}\n", pid))
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        info!(pid = pid, path = %self.path.display(), "PID file written");
        Ok(())
    }

    /// Remove the file if it still names this process
    pub fn release(&self) -> Result<()> {
        match self.recorded_pid() {
            None => return Ok(()),
            Some(pid) if pid != std::process::id() => {
                warn!(pid = pid, "PID file names another process, leaving it in place");
                return Ok(());
            }
            Some(_) => {}
        }

        fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove {}", self.path.display()))?;
        info!(path = %self.path.display(), "PID file removed");
        Ok(())
    }

    /// PID of a live daemon recorded in the file
    ///
    /// A missing file, unparsable contents or a dead process all read as
    /// "no daemon running".
    pub fn running_pid(&self) -> Option<u32> {
        self.recorded_pid().filter(|&pid| process_alive(pid))
    }

    fn recorded_pid(&self) -> Option<u32> {
        let contents = fs::read_to_string(&self.path).ok()?;
        contents.trim().parse().ok()
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0: permission and existence check only
    kill(Pid::from_raw(raw), None).is_ok()
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

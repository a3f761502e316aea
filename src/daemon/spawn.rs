// Daemon spawning
//
// Re-executes the current binary as a detached background process. The child
// gets the resolved configuration as flags, the handshake address in its
// environment, and the daemon log file as stdout/stderr.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::handshake::HANDSHAKE_ENV;
use crate::config::DaemonConfig;

/// Flags that make the child resolve exactly the parent's configuration
pub fn daemon_args(config: &DaemonConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--bucket".into(),
        config.bucket().into(),
        "--port".into(),
        config.port().to_string().into(),
        "--state-dir".into(),
        config.state_dir().as_os_str().to_owned(),
    ];
    if let Some(endpoint) = config.endpoint() {
        args.push("--s3url".into());
        args.push(endpoint.into());
    }
    if let Some(region) = config.region() {
        args.push("--region".into());
        args.push(region.into());
    }
    args
}

/// Spawn the daemon as a detached background process
///
/// - Unix: new session (no controlling terminal), log file redirection
/// - Windows: detached process without a console
pub fn spawn_daemon(config: &DaemonConfig, handshake_addr: SocketAddr) -> Result<Child> {
    let exe_path = std::env::current_exe()
        .context("Failed to determine current executable path")?;
    spawn_daemon_from(&exe_path, config, handshake_addr)
}

/// Spawn `exe_path` in daemon mode
pub fn spawn_daemon_from(
    exe_path: &Path,
    config: &DaemonConfig,
    handshake_addr: SocketAddr,
) -> Result<Child> {
    let log_path = config.log_file();

    std::fs::create_dir_all(config.state_dir()).with_context(|| {
        format!("Failed to create directory: {}", config.state_dir().display())
    })?;

    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o640);
    }
    let log_file = options
        .open(&log_path)
        .with_context(|| format!("Failed to open daemon log file: {}", log_path.display()))?;

    info!(
        exe = %exe_path.display(),
        port = config.port(),
        log = %log_path.display(),
        "Spawning daemon subprocess"
    );

    let mut command = Command::new(exe_path);
    command
        .args(daemon_args(config))
        .env(HANDSHAKE_ENV, handshake_addr.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file.try_clone().context("Failed to clone log file handle")?))
        .stderr(Stdio::from(log_file));

    #[cfg(unix)]
    detach_session(&mut command);

    #[cfg(windows)]
    {
        const DETACHED_PROCESS: u32 = 0x00000008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    let child = command
        .spawn()
        .with_context(|| format!("Failed to spawn daemon: {}", exe_path.display()))?;

    debug!(pid = ?child.id(), log = %log_path.display(), "Daemon subprocess spawned");
    Ok(child)
}

#[cfg(unix)]
fn detach_session(command: &mut Command) {
    // Safety: `pre_exec` runs in the child after `fork` and before `exec`;
    // `setsid` is async-signal-safe and the closure does not allocate.
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(std::io::Error::from)
        });
    }
}

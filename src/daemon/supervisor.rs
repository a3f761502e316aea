// Root-process side of a daemon launch
//
// Opens the handshake channel, spawns the detached daemon and blocks until the
// daemon reports whether it bound its port and reached the bucket.

use anyhow::{bail, Context, Result};
use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tracing::{debug, info};

use super::handshake::{HandshakeListener, HandshakeOutcome};
use super::spawn::spawn_daemon;
use crate::config::{DaemonConfig, DEFAULT_PORT};

/// Longest the root process waits for the daemon's report
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a report may trail the daemon's exit and still be read
const LATE_REPORT_GRACE: Duration = Duration::from_millis(500);

/// Launch the daemon and return the operator-facing status message
///
/// Fails with the daemon's own error description when startup failed, or
/// with a channel error when the daemon vanished without reporting.
pub async fn launch(config: &DaemonConfig) -> Result<String> {
    let listener = HandshakeListener::bind(config.port())
        .await
        .context("Internal application error")?;

    let mut child = spawn_daemon(config, listener.local_addr())?;
    let pid = child.id();

    let outcome = await_handshake(listener, child.wait(), STARTUP_TIMEOUT).await?;
    match outcome {
        HandshakeOutcome::Ready => {
            info!(pid = ?pid, port = config.port(), "Daemon reported ready");
            Ok(status_message(&executable_name(), config))
        }
        HandshakeOutcome::Failed(message) => {
            bail!("failed to initialize application: {}", message)
        }
    }
}

/// Wait for the single handshake message
///
/// Returns early with an error if `daemon_exit` resolves first (the daemon
/// died before reporting) or if `deadline` passes.
pub async fn await_handshake<F>(
    listener: HandshakeListener,
    daemon_exit: F,
    deadline: Duration,
) -> Result<HandshakeOutcome>
where
    F: Future<Output = io::Result<ExitStatus>>,
{
    let receive = listener.receive();
    tokio::pin!(receive);
    tokio::pin!(daemon_exit);

    tokio::select! {
        biased;

        outcome = &mut receive => {
            Ok(outcome.context("failed to initialize application")?)
        }
        status = &mut daemon_exit => {
            let status = status.context("Failed to wait for daemon process")?;
            debug!(status = %status, "Daemon exited before handshake completed");

            // A report written just before exiting may still be queued
            match tokio::time::timeout(LATE_REPORT_GRACE, &mut receive).await {
                Ok(outcome) => Ok(outcome.context("failed to initialize application")?),
                Err(_) => bail!(
                    "failed to initialize application: daemon exited ({}) before reporting its status",
                    status
                ),
            }
        }
        _ = tokio::time::sleep(deadline) => {
            bail!(
                "failed to initialize application: daemon did not report its status within {}s",
                deadline.as_secs()
            )
        }
    }
}

/// Message printed once the daemon is serving
pub fn status_message(executable: &str, config: &DaemonConfig) -> String {
    let port_switch = if config.port() != DEFAULT_PORT {
        format!(" --port {}", config.port())
    } else {
        String::new()
    };

    format!(
        "Server `{exe}` is running, to stop it run `{exe} --stop{port}` or `curl {url}`\nLogging to {log}",
        exe = executable,
        port = port_switch,
        url = config.shutdown_url(),
        log = config.log_file().display(),
    )
}

/// File name of the running binary
fn executable_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::handshake::HandshakeSender;
    use std::future::pending;
    use tokio::net::TcpStream;

    #[test]
    fn test_status_message_default_port() {
        let config = DaemonConfig::new("test-bucket", "/home/u/.bucketcache");
        let message = status_message("bucketcache", &config);

        assert!(message.starts_with("Server `bucketcache` is running"));
        assert!(message.contains("`bucketcache --stop`"));
        assert!(message.contains("curl http://localhost:7777/shutdown"));
        assert!(message.ends_with("Logging to /home/u/.bucketcache/daemon.log"));
    }

    #[test]
    fn test_status_message_custom_port() {
        let config = DaemonConfig::new("test-bucket", "/tmp/s").with_port(9090);
        let message = status_message("bucketcache", &config);

        assert!(message.contains("`bucketcache --stop --port 9090`"));
        assert!(message.contains("http://localhost:9090/shutdown"));
    }

    #[tokio::test]
    async fn test_ready_report() {
        let listener = HandshakeListener::bind(DEFAULT_PORT).await.unwrap();
        let sender = HandshakeSender::new(listener.local_addr());
        tokio::spawn(sender.send_ready());

        let outcome = await_handshake(listener, pending(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, HandshakeOutcome::Ready);
    }

    #[tokio::test]
    async fn test_daemon_closes_channel_without_message() {
        let listener = HandshakeListener::bind(DEFAULT_PORT).await.unwrap();
        let addr = listener.local_addr();
        tokio::spawn(async move {
            drop(TcpStream::connect(addr).await);
        });

        let err = await_handshake(listener, pending(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("without reporting its status"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_daemon_exits_without_connecting() {
        let listener = HandshakeListener::bind(DEFAULT_PORT).await.unwrap();
        let mut child = tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 3")
            .spawn()
            .unwrap();

        let err = await_handshake(listener, child.wait(), Duration::from_secs(30))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("daemon exited"), "{}", message);
        assert!(message.contains('3'), "{}", message);
    }

    #[tokio::test]
    async fn test_deadline_bounds_wait() {
        let listener = HandshakeListener::bind(DEFAULT_PORT).await.unwrap();

        let err = await_handshake(listener, pending(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not report"));
    }
}

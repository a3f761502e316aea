// Background-process side of a daemon launch
//
// Starting: bind the HTTP port, connect to the store and check the bucket.
// The outcome goes to the supervisor exactly once; on failure the process
// never serves. Serving lasts until `/shutdown` or a termination signal.

use anyhow::{bail, Context, Result};
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::handshake::HandshakeSender;
use super::lifecycle::PidFile;
use crate::config::DaemonConfig;
use crate::server::{CacheServer, DaemonContext};
use crate::store::{ObjectStore, S3Store};

/// Run the daemon against the configured S3 bucket
pub async fn run_daemon(config: DaemonConfig, handshake: HandshakeSender) -> Result<()> {
    run_daemon_with(config, handshake, |config| async move {
        let store = S3Store::connect(&config).await?;
        Ok(Arc::new(store) as Arc<dyn ObjectStore>)
    })
    .await
}

/// Run the daemon with a caller-supplied store constructor
pub async fn run_daemon_with<F, Fut>(
    config: DaemonConfig,
    handshake: HandshakeSender,
    connect: F,
) -> Result<()>
where
    F: FnOnce(DaemonConfig) -> Fut,
    Fut: Future<Output = Result<Arc<dyn ObjectStore>>>,
{
    info!(bucket = config.bucket(), port = config.port(), "Starting cache daemon");
    let pid_file = PidFile::new(config.pid_file());

    let server = match start(&config, &pid_file, connect).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Daemon startup failed");
            if let Err(send_err) = handshake.send_failure(&format!("{:#}", e)).await {
                warn!(error = %send_err, "Could not report startup failure to supervisor");
            }
            return Err(e);
        }
    };

    // The supervisor may already be gone; serving goes on regardless
    if let Err(e) = handshake.send_ready().await {
        warn!(error = %e, "Could not report startup to supervisor");
    }

    watch_termination_signals(server.context().shutdown_token());

    let result = server.serve().await;

    if let Err(e) = pid_file.release() {
        error!(error = %e, "Failed to remove PID file");
    }
    info!("Daemon shutdown complete");
    result
}

/// Starting state: everything that must succeed before the handshake
async fn start<F, Fut>(
    config: &DaemonConfig,
    pid_file: &PidFile,
    connect: F,
) -> Result<CacheServer>
where
    F: FnOnce(DaemonConfig) -> Fut,
    Fut: Future<Output = Result<Arc<dyn ObjectStore>>>,
{
    if let Some(pid) = pid_file.running_pid() {
        bail!(
            "daemon is already running (PID: {}), stop it with `curl {}`",
            pid,
            config.shutdown_url()
        );
    }

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.port()));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("can't open port {}", addr.port()))?;

    let store = connect(config.clone()).await.context("cannot load config")?;
    store
        .head_bucket()
        .await
        .with_context(|| format!("cannot connect to the bucket {}", config.bucket()))?;

    pid_file.claim()?;

    let context = Arc::new(DaemonContext::new(store));
    Ok(CacheServer::from_listener(listener, context))
}

/// Cancel `token` on SIGINT or SIGTERM
fn watch_termination_signals(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Cannot listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
            _ = terminate => info!("Received SIGTERM, shutting down"),
            _ = token.cancelled() => return,
        }
        token.cancel();
    });
}

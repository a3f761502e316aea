// bucketcache - local remote-cache proxy backed by an S3 bucket
// Main entry point

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use bucketcache::client::send_shutdown;
use bucketcache::config::{load_file_config, shutdown_url, DaemonConfig, FileConfig, DEFAULT_PORT};
use bucketcache::daemon::{launch, run_daemon, HandshakeSender};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "bucketcache")]
#[command(about = "Local HTTP remote cache backed by an S3 bucket", version)]
struct Args {
    /// S3 bucket name
    #[arg(long)]
    bucket: Option<String>,

    /// Server HTTP port number [default: 7777]
    #[arg(long)]
    port: Option<u16>,

    /// Stop the running daemon
    #[arg(long)]
    stop: bool,

    /// S3 endpoint override, for test environments and S3-compatible servers
    #[arg(long)]
    s3url: Option<String>,

    /// AWS region (defaults to the AWS environment, or us-east-1 with --s3url)
    #[arg(long)]
    region: Option<String>,

    /// Config file [default: ~/.bucketcache/config.toml]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the PID and log files [default: ~/.bucketcache]
    #[arg(long = "state-dir")]
    state_dir: Option<PathBuf>,
}

impl Args {
    fn cli_layer(&self) -> FileConfig {
        FileConfig {
            bucket: self.bucket.clone(),
            port: self.port,
            s3url: self.s3url.clone(),
            region: self.region.clone(),
            state_dir: self.state_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        println!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    // The supervisor marks the processes it spawns through the environment
    match HandshakeSender::from_env()? {
        Some(handshake) => run_daemon_process(args, handshake).await,
        None if args.stop => run_stop(args).await,
        None => run_supervisor(args).await,
    }
}

/// Root process: spawn the daemon and report its startup
async fn run_supervisor(args: Args) -> Result<()> {
    init_cli_tracing();

    let file = load_file_config(args.config.as_deref())?;
    let config = DaemonConfig::resolve(args.cli_layer(), file)?;

    let message = launch(&config).await?;
    println!("{}", message);
    Ok(())
}

/// Detached process: serve until shutdown
async fn run_daemon_process(args: Args, handshake: HandshakeSender) -> Result<()> {
    init_daemon_tracing();

    // The supervisor passes every resolved setting as a flag; no file layer
    let config = match DaemonConfig::resolve(args.cli_layer(), FileConfig::default()) {
        Ok(config) => config,
        Err(e) => {
            if let Err(send_err) = handshake.send_failure(&format!("{:#}", e)).await {
                tracing::warn!(error = %send_err, "Could not report startup failure to supervisor");
            }
            return Err(e);
        }
    };

    run_daemon(config, handshake).await
}

/// `--stop`: ask the running daemon to exit
async fn run_stop(args: Args) -> Result<()> {
    init_cli_tracing();

    let port = match args.port {
        Some(port) => port,
        None => load_file_config(args.config.as_deref())?
            .port
            .unwrap_or(DEFAULT_PORT),
    };

    let response = send_shutdown(&shutdown_url(port)).await?;
    println!("{}", response);
    Ok(())
}

/// Tracing for the short-lived CLI processes
///
/// Default: WARN level on stderr so the operator sees only the outcome line.
/// Can be overridden with RUST_LOG.
fn init_cli_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Bridge log crate → tracing (for dependencies using log crate)
    tracing_log::LogTracer::init().ok();
}

/// Tracing for the daemon
///
/// stdout is the daemon log file (set up by the spawner), so no ANSI colors.
fn init_daemon_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_ansi(false))
        .init();

    tracing_log::LogTracer::init().ok();
}

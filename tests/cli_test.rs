// End-to-end tests for the bucketcache binary
//
// Each test runs the real executable with HOME pointed at a temp directory
// so no operator config or state is touched.

use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn bucketcache(home: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_bucketcache"));
    command
        .env("HOME", home)
        .env_remove("BUCKETCACHE_HANDSHAKE_ADDR")
        .env_remove("RUST_LOG");
    command
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_stop_without_daemon() {
    let home = TempDir::new().unwrap();
    let output = bucketcache(home.path())
        .args(["--stop", "--port", &free_port().to_string()])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout(&output).trim(), "Error: server is not running");
}

#[test]
fn test_missing_bucket() {
    let home = TempDir::new().unwrap();
    let output = bucketcache(home.path()).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(
        stdout(&output).contains("Please specify S3 bucket name: --bucket <name>"),
        "stdout: {}",
        stdout(&output)
    );
}

#[test]
fn test_unknown_config_key_is_rejected() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("cache.toml");
    std::fs::write(&config, "bucket = \"from-file\"\nunknown_key = 1\n").unwrap();

    // Unknown keys are rejected before anything is spawned
    let output = bucketcache(home.path())
        .arg("--config")
        .arg(&config)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("unknown_key"), "stdout: {}", stdout(&output));
}

#[test]
fn test_unreachable_store_fails_launch() {
    let home = TempDir::new().unwrap();
    let state = home.path().join("state");
    let port = free_port();

    let output = bucketcache(home.path())
        .args(["--bucket", "no-such-bucket"])
        .args(["--port", &port.to_string()])
        .args(["--s3url", "http://127.0.0.1:1"])
        .arg("--state-dir")
        .arg(&state)
        .env("AWS_ACCESS_KEY_ID", "test")
        .env("AWS_SECRET_ACCESS_KEY", "test")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let out = stdout(&output);
    assert!(out.starts_with("Error: failed to initialize application:"), "stdout: {}", out);
    assert!(out.contains("cannot connect to the bucket no-such-bucket"), "stdout: {}", out);

    // The daemon logged its failure and left no PID file behind
    assert!(state.join("daemon.log").exists());
    assert!(!state.join("daemon.pid").exists());

    // Nothing is serving on the port
    let stop = bucketcache(home.path())
        .args(["--stop", "--port", &port.to_string()])
        .output()
        .unwrap();
    assert_eq!(stdout(&stop).trim(), "Error: server is not running");
}

/// Full launch/stop cycle against a mock S3 endpoint
///
/// The daemon only issues HeadBucket at startup, so a server answering HEAD
/// with 200 is enough for it to report ready.
#[test]
fn test_launch_serve_and_stop() {
    let mut s3 = mockito::Server::new();
    let head_bucket = s3
        .mock("HEAD", mockito::Matcher::Any)
        .with_status(200)
        .expect_at_least(1)
        .create();

    let home = TempDir::new().unwrap();
    let pid_file = home.path().join(".bucketcache").join("daemon.pid");
    let port = free_port().to_string();
    let endpoint = s3.url();
    let launch_args = ["--bucket", "cache-bucket", "--port", &port, "--s3url", &endpoint];

    let launch = bucketcache(home.path())
        .args(launch_args)
        .env("AWS_ACCESS_KEY_ID", "test")
        .env("AWS_SECRET_ACCESS_KEY", "test")
        .output()
        .unwrap();
    let message = stdout(&launch);
    assert!(launch.status.success(), "stdout: {}", message);
    assert!(message.starts_with("Server `bucketcache` is running"), "{}", message);
    assert!(message.contains(&format!("--stop --port {}`", port)), "{}", message);
    assert!(message.contains(&format!("curl http://localhost:{}/shutdown", port)), "{}", message);
    assert!(message.contains("Logging to"), "{}", message);
    assert!(pid_file.exists());
    head_bucket.assert();

    // A second launch on the same state dir finds the daemon running
    let again = bucketcache(home.path())
        .args(launch_args)
        .env("AWS_ACCESS_KEY_ID", "test")
        .env("AWS_SECRET_ACCESS_KEY", "test")
        .output()
        .unwrap();
    assert_eq!(again.status.code(), Some(1));
    assert!(stdout(&again).contains("failed to initialize application"), "{}", stdout(&again));

    let stop = bucketcache(home.path()).args(["--stop", "--port", &port]).output().unwrap();
    assert!(stop.status.success());
    assert_eq!(stdout(&stop).trim(), "Shutting down");

    // The daemon removes its PID file on the way out
    for _ in 0..100 {
        if !pid_file.exists() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    assert!(!pid_file.exists());

    let stop = bucketcache(home.path()).args(["--stop", "--port", &port]).output().unwrap();
    assert_eq!(stop.status.code(), Some(1));
    assert_eq!(stdout(&stop).trim(), "Error: server is not running");
}

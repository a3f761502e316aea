// Configuration structs

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::loader::FileConfig;

/// Port the daemon listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 7777;

/// Largest PUT body the daemon forwards to the store (64 MiB)
pub const MAX_OBJECT_SIZE: usize = 64 * 1024 * 1024;

/// Directory under $HOME holding the pid file, log file and config file
pub const DEFAULT_STATE_DIR: &str = ".bucketcache";

/// Shutdown endpoint of a daemon listening on `port`
pub fn shutdown_url(port: u16) -> String {
    format!("http://localhost:{}/shutdown", port)
}

/// Runtime configuration of one daemon launch.
///
/// Built once at startup and never mutated afterwards; the builder methods
/// consume `self` so a shared `DaemonConfig` cannot change underneath readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    bucket: String,
    endpoint: Option<String>,
    region: Option<String>,
    port: u16,
    state_dir: PathBuf,
}

impl DaemonConfig {
    pub fn new(bucket: impl Into<String>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            endpoint: None,
            region: None,
            port: DEFAULT_PORT,
            state_dir: state_dir.into(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the object store endpoint (test environments, S3-compatible servers)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Merge CLI values over file values and validate the result
    ///
    /// CLI settings win; anything left unset falls back to the config file and
    /// then to built-in defaults. A bucket is mandatory.
    pub fn resolve(cli: FileConfig, file: FileConfig) -> Result<Self> {
        let merged = cli.or(file);

        let bucket = merged
            .bucket
            .filter(|b| !b.trim().is_empty())
            .context("Please specify S3 bucket name: --bucket <name>")?;

        let state_dir = match merged.state_dir {
            Some(dir) => dir,
            None => default_state_dir()?,
        };

        let mut config = Self::new(bucket, state_dir).with_port(merged.port.unwrap_or(DEFAULT_PORT));
        if let Some(endpoint) = merged.s3url.filter(|u| !u.is_empty()) {
            config = config.with_endpoint(endpoint);
        }
        if let Some(region) = merged.region {
            config = config.with_region(region);
        }
        Ok(config)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn pid_file(&self) -> PathBuf {
        self.state_dir.join("daemon.pid")
    }

    pub fn log_file(&self) -> PathBuf {
        self.state_dir.join("daemon.log")
    }

    pub fn shutdown_url(&self) -> String {
        shutdown_url(self.port)
    }
}

/// `~/.bucketcache`
fn default_state_dir() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("Cannot determine home directory")?
        .join(DEFAULT_STATE_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(bucket: Option<&str>, port: Option<u16>) -> FileConfig {
        FileConfig {
            bucket: bucket.map(str::to_string),
            port,
            state_dir: Some(PathBuf::from("/tmp/bucketcache-test")),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::new("cache", "/tmp/state");
        assert_eq!(config.port(), DEFAULT_PORT);
        assert_eq!(config.endpoint(), None);
        assert_eq!(config.shutdown_url(), "http://localhost:7777/shutdown");
        assert_eq!(config.pid_file(), PathBuf::from("/tmp/state/daemon.pid"));
        assert_eq!(config.log_file(), PathBuf::from("/tmp/state/daemon.log"));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = FileConfig {
            bucket: Some("from-file".into()),
            port: Some(9000),
            region: Some("eu-west-1".into()),
            ..Default::default()
        };

        let config = DaemonConfig::resolve(cli(Some("from-cli"), None), file).unwrap();
        assert_eq!(config.bucket(), "from-cli");
        assert_eq!(config.port(), 9000);
        assert_eq!(config.region(), Some("eu-west-1"));
        assert_eq!(config.shutdown_url(), "http://localhost:9000/shutdown");
    }

    #[test]
    fn test_missing_bucket_is_rejected() {
        let err = DaemonConfig::resolve(cli(None, Some(8080)), FileConfig::default()).unwrap_err();
        assert!(err.to_string().contains("--bucket"));

        let err = DaemonConfig::resolve(cli(Some("  "), None), FileConfig::default()).unwrap_err();
        assert!(err.to_string().contains("Please specify S3 bucket name"));
    }

    #[test]
    fn test_empty_endpoint_is_ignored() {
        let mut layer = cli(Some("b"), None);
        layer.s3url = Some(String::new());
        let config = DaemonConfig::resolve(layer, FileConfig::default()).unwrap();
        assert_eq!(config.endpoint(), None);
    }
}

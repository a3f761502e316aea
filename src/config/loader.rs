// Configuration loader
// Loads optional settings from ~/.bucketcache/config.toml

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::DEFAULT_STATE_DIR;

/// One layer of user-supplied settings.
///
/// The same shape is used for the TOML file and for CLI flags so the two can
/// be merged field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bucket: Option<String>,
    pub port: Option<u16>,
    pub s3url: Option<String>,
    pub region: Option<String>,
    pub state_dir: Option<PathBuf>,
}

impl FileConfig {
    /// Fill every unset field of `self` from `fallback`
    pub fn or(self, fallback: FileConfig) -> FileConfig {
        FileConfig {
            bucket: self.bucket.or(fallback.bucket),
            port: self.port.or(fallback.port),
            s3url: self.s3url.or(fallback.s3url),
            region: self.region.or(fallback.region),
            state_dir: self.state_dir.or(fallback.state_dir),
        }
    }
}

/// `~/.bucketcache/config.toml`, if a home directory exists
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_STATE_DIR).join("config.toml"))
}

/// Load the config file
///
/// An explicitly requested path must exist. The default path is optional:
/// when it is absent an empty layer is returned.
pub fn load_file_config(explicit: Option<&Path>) -> Result<FileConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(FileConfig::default()),
        },
    };

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

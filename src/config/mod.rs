// Configuration module
// Public interface for configuration loading

mod loader;
mod settings;

pub use loader::{default_config_path, load_file_config, FileConfig};
pub use settings::{
    shutdown_url, DaemonConfig, DEFAULT_PORT, DEFAULT_STATE_DIR, MAX_OBJECT_SIZE,
};

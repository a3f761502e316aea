// HTTP client for daemon communication
//
// Provides the stop path: asks a running daemon to shut down.

mod shutdown;

pub use shutdown::{send_shutdown, ShutdownError};

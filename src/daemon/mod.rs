// Daemon module: split a launch into a short-lived root process and a
// detached background daemon
//
// The root process (supervisor) opens the handshake channel, spawns the daemon
// and waits for its single startup report. The daemon (runner) binds its port,
// validates the bucket, reports, and then serves until shut down.

pub mod handshake;
pub mod lifecycle;
pub mod runner;
pub mod spawn;
pub mod supervisor;

pub use handshake::{HandshakeListener, HandshakeOutcome, HandshakeSender, HANDSHAKE_ENV};
pub use lifecycle::PidFile;
pub use runner::{run_daemon, run_daemon_with};
pub use spawn::spawn_daemon;
pub use supervisor::{launch, status_message};

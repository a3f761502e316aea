// bucketcache - local remote-cache proxy backed by an S3 bucket
// Library exports

pub mod client; // Shutdown client (`--stop`)
pub mod config;
pub mod daemon; // Supervisor/daemon split and startup handshake
pub mod server; // HTTP request handling
pub mod store; // Object store abstraction and S3 adapter

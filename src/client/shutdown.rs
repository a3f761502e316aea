// Shutdown client
//
// Runs in a fresh process (`--stop`) and asks a running daemon to exit.

use reqwest::Client;
use std::error::Error as _;
use std::io;
use std::time::Duration;
use tracing::debug;

/// Request timeout for the shutdown call
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// Nothing is listening on the daemon port
    #[error("server is not running")]
    NotRunning,

    #[error("unexpected error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("internal application error: {0}")]
    Body(#[source] reqwest::Error),
}

/// GET the daemon's shutdown URL and return the response body verbatim
pub async fn send_shutdown(url: &str) -> Result<String, ShutdownError> {
    let client = Client::builder()
        .timeout(SHUTDOWN_TIMEOUT)
        .build()
        .map_err(ShutdownError::Transport)?;

    debug!(url = %url, "Sending shutdown request");

    let response = client.get(url).send().await.map_err(|e| {
        if is_connection_refused(&e) {
            ShutdownError::NotRunning
        } else {
            ShutdownError::Transport(e)
        }
    })?;

    response.text().await.map_err(ShutdownError::Body)
}

/// Walk the error chain looking for ECONNREFUSED
fn is_connection_refused(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refused_connection_means_not_running() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = send_shutdown(&format!("http://127.0.0.1:{}/shutdown", port))
            .await
            .unwrap_err();
        assert!(matches!(err, ShutdownError::NotRunning), "{:?}", err);
        assert_eq!(err.to_string(), "server is not running");
    }

    #[tokio::test]
    async fn test_invalid_url_is_transport_error() {
        let err = send_shutdown("not a url").await.unwrap_err();
        assert!(matches!(err, ShutdownError::Transport(_)), "{:?}", err);
        assert!(err.to_string().starts_with("unexpected error"));
    }
}

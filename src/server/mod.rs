// Cache daemon HTTP server
// Maps GET/PUT on /{key} onto object store operations

mod handlers;

pub use handlers::{create_router, ALLOWED_METHODS, SHUTDOWN_ACK};

use anyhow::{Context, Result};
use bytes::Bytes;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::MAX_OBJECT_SIZE;
use crate::store::ObjectStore;

/// How long in-flight responses may take to finish once shutdown is requested
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// State shared by every request handler for the daemon's lifetime
pub struct DaemonContext {
    /// Backing store (the only stateful resource)
    store: Arc<dyn ObjectStore>,
    /// Cancelled once by `/shutdown` or a termination signal
    shutdown: CancellationToken,
    /// PUT bodies larger than this are rejected
    max_object_size: usize,
}

impl DaemonContext {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            shutdown: CancellationToken::new(),
            max_object_size: MAX_OBJECT_SIZE,
        }
    }

    /// Lower the PUT size limit (tests)
    pub fn with_max_object_size(mut self, max_object_size: usize) -> Self {
        self.max_object_size = max_object_size;
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn max_object_size(&self) -> usize {
        self.max_object_size
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ask the server to stop; idempotent
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Write `body` to the store in a detached task
    ///
    /// Nothing joins the task. Its failure is logged and never reaches the
    /// client, and writes still running when the process exits are lost.
    pub fn spawn_upload(&self, key: String, body: Bytes) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let size = body.len();
            match store.put(&key, body).await {
                Ok(()) => debug!(key = %key, size = size, "Upload complete"),
                Err(e) => error!(key = %key, error = %e, "Couldn't upload object"),
            }
        });
    }
}

/// HTTP listener bound to the daemon port, ready to serve
pub struct CacheServer {
    listener: TcpListener,
    context: Arc<DaemonContext>,
}

impl CacheServer {
    /// Bind `addr` and attach the daemon context
    pub async fn bind(addr: SocketAddr, context: Arc<DaemonContext>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("can't open port {}", addr.port()))?;
        Ok(Self::from_listener(listener, context))
    }

    pub fn from_listener(listener: TcpListener, context: Arc<DaemonContext>) -> Self {
        Self { listener, context }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> &Arc<DaemonContext> {
        &self.context
    }

    /// Serve until shutdown is requested
    ///
    /// After the shutdown token fires the listener stops accepting, in-flight
    /// responses (the shutdown acknowledgment included) are allowed to finish,
    /// and anything still open after `SHUTDOWN_GRACE` is dropped.
    pub async fn serve(self) -> Result<()> {
        let addr = self.local_addr()?;
        let shutdown = self.context.shutdown_token();

        let app = create_router(Arc::clone(&self.context)).layer(TraceLayer::new_for_http());

        let signal = shutdown.clone();
        let server = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .into_future();

        info!(addr = %addr, "Cache daemon serving");

        tokio::select! {
            result = server => {
                result.context("HTTP server failed")?;
                info!("Server stopped");
            }
            _ = async {
                shutdown.cancelled().await;
                tokio::time::sleep(SHUTDOWN_GRACE).await;
            } => {
                warn!(
                    grace_secs = SHUTDOWN_GRACE.as_secs(),
                    "Connections still open after shutdown grace period, dropping them"
                );
            }
        }

        Ok(())
    }
}

// Startup handshake between the supervisor and the detached daemon
//
// The supervisor binds a loopback listener before spawning the daemon and
// passes its address through the environment. The daemon connects once,
// writes either the success marker or an error description, and closes.
// Both ends consume themselves, so at most one message is ever exchanged.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Environment variable carrying the handshake address to the daemon
pub const HANDSHAKE_ENV: &str = "BUCKETCACHE_HANDSHAKE_ADDR";

/// Payload meaning "port bound and bucket reachable"
pub const SUCCESS_MARKER: &str = "success";

/// Largest payload the supervisor accepts
const MAX_PAYLOAD: u64 = 64 * 1024;

/// Rebind attempts when the OS hands out the daemon's own port
const MAX_BIND_ATTEMPTS: usize = 8;

/// Upper bound on delivering the handshake from the daemon side
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("could not open handshake channel: {0}")]
    Bind(#[source] io::Error),

    #[error("daemon closed the handshake channel without reporting its status")]
    Closed,

    #[error("handshake channel failed: {0}")]
    Io(#[source] io::Error),

    #[error("invalid handshake address {0:?} in {HANDSHAKE_ENV}")]
    InvalidAddress(String),
}

/// What the daemon reported about its startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Daemon holds its port and reached the store
    Ready,
    /// Daemon failed to start; carries its error description
    Failed(String),
}

impl HandshakeOutcome {
    /// Decode a complete handshake payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, HandshakeError> {
        if payload.is_empty() {
            return Err(HandshakeError::Closed);
        }
        if payload == SUCCESS_MARKER.as_bytes() {
            return Ok(Self::Ready);
        }
        Ok(Self::Failed(String::from_utf8_lossy(payload).trim().to_string()))
    }
}

/// Supervisor end of the channel
#[derive(Debug)]
pub struct HandshakeListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl HandshakeListener {
    /// Bind a loopback port chosen by the OS, never `avoid_port`
    ///
    /// `avoid_port` is the daemon's HTTP port: if the OS happened to hand it
    /// out, the daemon could not bind it later.
    pub async fn bind(avoid_port: u16) -> Result<Self, HandshakeError> {
        // Rejected listeners stay bound until we return so the OS cannot
        // hand the same port out again.
        let mut rejected = Vec::new();

        for _ in 0..MAX_BIND_ATTEMPTS {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
                .await
                .map_err(HandshakeError::Bind)?;
            let addr = listener.local_addr().map_err(HandshakeError::Bind)?;

            if addr.port() != avoid_port {
                debug!(addr = %addr, "Handshake channel open");
                return Ok(Self { listener, addr });
            }
            rejected.push(listener);
        }

        Err(HandshakeError::Bind(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("could not find a free port other than {}", avoid_port),
        )))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accept exactly one connection and read its whole payload
    ///
    /// The listener is closed as soon as the connection is accepted.
    pub async fn receive(self) -> Result<HandshakeOutcome, HandshakeError> {
        let (stream, peer) = self.listener.accept().await.map_err(HandshakeError::Io)?;
        drop(self.listener);
        debug!(peer = %peer, "Handshake connection accepted");

        let mut payload = Vec::new();
        stream
            .take(MAX_PAYLOAD)
            .read_to_end(&mut payload)
            .await
            .map_err(HandshakeError::Io)?;

        HandshakeOutcome::from_payload(&payload)
    }
}

/// Daemon end of the channel
#[derive(Debug, PartialEq, Eq)]
pub struct HandshakeSender {
    addr: SocketAddr,
}

impl HandshakeSender {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Read the supervisor's address from the environment
    ///
    /// Returns `None` when the process was not launched by a supervisor,
    /// i.e. this is the root process.
    pub fn from_env() -> Result<Option<Self>, HandshakeError> {
        match std::env::var(HANDSHAKE_ENV) {
            Ok(value) => value
                .parse()
                .map(|addr| Some(Self::new(addr)))
                .map_err(|_| HandshakeError::InvalidAddress(value)),
            Err(_) => Ok(None),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Report a successful startup
    pub async fn send_ready(self) -> Result<(), HandshakeError> {
        self.send(SUCCESS_MARKER.as_bytes()).await
    }

    /// Report a failed startup
    pub async fn send_failure(self, message: &str) -> Result<(), HandshakeError> {
        // An empty payload would read as "closed without reporting"
        let message = if message.is_empty() { "unknown error" } else { message };
        self.send(message.as_bytes()).await
    }

    async fn send(self, payload: &[u8]) -> Result<(), HandshakeError> {
        let delivery = async {
            let mut stream = TcpStream::connect(self.addr).await?;
            stream.write_all(payload).await?;
            stream.shutdown().await
        };

        match tokio::time::timeout(SEND_TIMEOUT, delivery).await {
            Ok(result) => result.map_err(HandshakeError::Io),
            Err(_) => Err(HandshakeError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "supervisor did not accept the handshake",
            ))),
        }
    }
}

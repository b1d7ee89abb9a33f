//! Worker registration listener.
//!
//! Accepts TCP connections, validates the handshake (magic, 4-digit length,
//! name) and hands the connection to the [`RegistrationSink`]. A bad
//! handshake closes the connection without touching the sink.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use spindle_protocol::handshake::{self, HandshakeError, LENGTH_FIELD_LEN};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Receives connections that completed the handshake.
pub trait RegistrationSink: Send + Sync + 'static {
    /// Bind `stream` to the worker named `name`.
    fn register(&self, name: String, stream: TcpStream);
}

/// Registration listener configuration.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Hostname to bind to
    pub hostname: String,
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Time a client has to complete the handshake
    pub handshake_timeout_ms: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".into(),
            port: 11000,
            handshake_timeout_ms: 10_000,
        }
    }
}

/// Running registration listener.
pub struct RegistrationListener {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl RegistrationListener {
    /// Bind and start the accept loop.
    pub async fn start<S: RegistrationSink>(
        config: RegistrationConfig,
        sink: Arc<S>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind((config.hostname.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let timeout = Duration::from_millis(config.handshake_timeout_ms);

        info!("Registration listener on {local_addr}");

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!("Incoming worker connection: {peer}");
                                let sink = sink.clone();
                                tokio::spawn(async move {
                                    accept_worker(stream, peer, timeout, sink).await;
                                });
                            }
                            Err(e) => error!("Error accepting worker connection: {e}"),
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting. Already registered connections are unaffected.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Registration listener stopped");
    }
}

async fn accept_worker<S: RegistrationSink>(
    mut stream: TcpStream,
    peer: SocketAddr,
    timeout: Duration,
    sink: Arc<S>,
) {
    let outcome = match tokio::time::timeout(timeout, read_handshake(&mut stream)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(HandshakeError::Timeout),
    };

    match outcome {
        Ok(name) => {
            info!("Connection accepted from worker {name} ({peer})");
            sink.register(name, stream);
        }
        Err(e) => {
            // Dropping the stream closes the connection.
            warn!("Rejected worker connection from {peer}: {e}");
        }
    }
}

/// Read one registration frame and return the announced route name.
pub async fn read_handshake(stream: &mut TcpStream) -> Result<String, HandshakeError> {
    let mut magic = [0u8; 5];
    stream.read_exact(&mut magic).await?;
    handshake::check_magic(&magic)?;

    let mut length = [0u8; LENGTH_FIELD_LEN];
    stream.read_exact(&mut length).await?;
    let len = handshake::parse_length(&length)?;

    let mut name = vec![0u8; len];
    stream.read_exact(&mut name).await?;
    handshake::parse_name(name)
}

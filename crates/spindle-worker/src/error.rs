use spindle_protocol::{HandshakeError, RpcError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("registration failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("bridge call failed: {} ({})", .0.message, .0.code)]
    Rpc(RpcError),
    #[error("session bridge disconnected")]
    Disconnected,
    #[error("unexpected bridge payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("a handler for {0} is already registered")]
    DuplicateHandler(String),
    #[error("{0} is not an HTTP method")]
    UnknownMethod(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Raised by request handlers.
    #[error("{0}")]
    Handler(String),
}

impl WorkerError {
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

impl From<RpcError> for WorkerError {
    fn from(err: RpcError) -> Self {
        Self::Rpc(err)
    }
}

//! Worker runtime: register with the coordinator, then serve every session
//! id it sends.

use std::sync::Arc;

use spindle_protocol::handshake;
use spindle_protocol::session::SESSION_ID_LEN;
use spindle_protocol::{SessionId, env};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::client::RpcClient;
use crate::context::Context;
use crate::error::WorkerError;
use crate::handlers::{Handlers, Resolved};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub route: String,
    pub registry_addr: String,
    pub rpc_addr: String,
    pub authorizer: bool,
}

impl WorkerConfig {
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            registry_addr: env::DEFAULT_REGISTRY_ADDR.into(),
            rpc_addr: env::DEFAULT_RPC_ADDR.into(),
            authorizer: false,
        }
    }

    /// Read the environment the supervisor starts workers with.
    pub fn from_env() -> Result<Self, WorkerError> {
        let route = std::env::var(env::ROUTE).map_err(|_| WorkerError::MissingEnv(env::ROUTE))?;
        let mut config = Self::new(route);
        if let Ok(addr) = std::env::var(env::REGISTRY_ADDR) {
            config.registry_addr = addr;
        }
        if let Ok(addr) = std::env::var(env::RPC_ADDR) {
            config.rpc_addr = addr;
        }
        config.authorizer = std::env::var(env::AUTHORIZER).is_ok_and(|v| v == "1");
        Ok(config)
    }
}

pub struct Worker {
    config: WorkerConfig,
    registration: TcpStream,
    client: Arc<RpcClient>,
}

impl Worker {
    /// Open the bridge connection and register under the configured route.
    pub async fn connect(config: WorkerConfig) -> Result<Self, WorkerError> {
        let frame = handshake::encode(&config.route)?;
        let client = RpcClient::connect(&config.rpc_addr).await?;

        let mut registration = TcpStream::connect(&config.registry_addr)
            .await
            .map_err(|source| WorkerError::Connect {
                addr: config.registry_addr.clone(),
                source,
            })?;
        registration.write_all(&frame).await?;
        registration.flush().await?;

        info!("Worker {} registered with {}", config.route, config.registry_addr);
        Ok(Self {
            config,
            registration,
            client: Arc::new(client),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Serve sessions until the coordinator closes the registration
    /// connection, then wait for in-flight sessions to finish.
    pub async fn serve(mut self, handlers: Handlers) -> Result<(), WorkerError> {
        let handlers = Arc::new(handlers);
        let mut in_flight = JoinSet::new();

        loop {
            let mut raw = [0u8; SESSION_ID_LEN];
            match self.registration.read_exact(&mut raw).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let session = SessionId::from_bytes(raw);
            let client = self.client.clone();
            let handlers = handlers.clone();
            in_flight.spawn(async move { run_session(session, client, &handlers).await });

            // Reap finished sessions so the set doesn't grow.
            while in_flight.try_join_next().is_some() {}
        }

        info!("Worker {} released by coordinator", self.config.route);
        while in_flight.join_next().await.is_some() {}
        Ok(())
    }
}

async fn run_session(session: SessionId, client: Arc<RpcClient>, handlers: &Handlers) {
    let request = match client.accept(&session).await {
        Ok(request) => request,
        Err(e) => {
            warn!("Could not accept session {session:?}: {e}");
            return;
        }
    };
    debug!("Session {session:?}: {}", request.method);

    let ctx = Context::new(session, request, client.clone());
    let outcome = match handlers.resolve(ctx.method()) {
        Resolved::Handler(handler) => handler(ctx.clone()).await,
        Resolved::NotAllowed => ctx.set_status(405).await,
    };

    if let Err(e) = outcome {
        warn!("Handler for session {session:?} failed: {e}");
        let _ = ctx.set_status(500).await;
        let _ = ctx.notice(&e.to_string()).await;
    }

    if let Err(e) = client.close(&session).await {
        warn!("Could not close session {session:?}: {e}");
    }
}

/// Register using the environment and serve `handlers` until released.
pub async fn run(handlers: Handlers) -> Result<(), WorkerError> {
    Worker::connect(WorkerConfig::from_env()?).await?.serve(handlers).await
}

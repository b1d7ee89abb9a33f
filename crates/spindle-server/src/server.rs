//! Spindle: one running coordinator: both TCP listeners, the shared
//! registry and session store, the coordinator and the HTTP app state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use spindle_runtime::{Builder, ProjectLayout, Supervisor, SupervisorConfig};
use spindle_transport::{RegistrationConfig, RegistrationListener, RpcConfig, RpcServer};
use thiserror::Error;
use tracing::info;

use crate::auth::AuthorizationGate;
use crate::bridge::SessionBridge;
use crate::config::{ConfigError, ProjectConfig};
use crate::coordinator::{Coordinator, DEFAULT_DEBOUNCE};
use crate::dispatcher::{DEFAULT_SESSION_TIMEOUT, Dispatcher};
use crate::http::{AppState, router};
use crate::registry::WorkerRegistry;
use crate::sessions::SessionStore;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to prepare {path}: {source}")]
    Layout {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to bind {listener} listener: {source}")]
    Bind {
        listener: &'static str,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub registration: RegistrationConfig,
    pub rpc: RpcConfig,
    pub session_timeout: Duration,
    pub reload_debounce: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            registration: RegistrationConfig::default(),
            rpc: RpcConfig::default(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            reload_debounce: DEFAULT_DEBOUNCE,
        }
    }
}

pub struct Spindle {
    layout: ProjectLayout,
    registry: WorkerRegistry,
    sessions: Arc<SessionStore>,
    listener: RegistrationListener,
    rpc: RpcServer,
    coordinator: Arc<Coordinator>,
    state: Arc<AppState>,
}

impl Spindle {
    /// Validate the project, prepare its run directory and bind both worker
    /// listeners. Workers are not built until [`Spindle::launch_workers`].
    pub async fn start(config: ProjectConfig, layout: ProjectLayout, options: ServerOptions) -> Result<Self, ServerError> {
        config.validate(&layout)?;
        layout.prepare().map_err(|source| ServerError::Layout {
            path: layout.run_dir().display().to_string(),
            source,
        })?;

        let registry = WorkerRegistry::new();
        let sessions = Arc::new(SessionStore::new());

        let listener = RegistrationListener::start(options.registration, Arc::new(registry.clone()))
            .await
            .map_err(|source| ServerError::Bind {
                listener: "registration",
                source,
            })?;
        let rpc = RpcServer::start(options.rpc, Arc::new(SessionBridge::new(sessions.clone())))
            .await
            .map_err(|source| ServerError::Bind {
                listener: "session bridge",
                source,
            })?;

        let supervisor = Supervisor::new(
            layout.clone(),
            SupervisorConfig {
                registry_addr: listener.local_addr(),
                rpc_addr: rpc.local_addr(),
            },
        );
        let builder = Builder::new(layout.clone(), config.toolchain.clone());
        let mut gate = AuthorizationGate::new(config.authorizer_route());
        if let Some(html) = config.load_unauthorized_page(&layout)? {
            gate = gate.with_failure_page(html);
        }
        let coordinator = Coordinator::new(config, builder, registry.clone(), supervisor)
            .with_debounce(options.reload_debounce);

        let state = Arc::new(AppState {
            dispatcher: Arc::new(Dispatcher::new(registry.clone(), sessions.clone(), options.session_timeout)),
            gate: Arc::new(gate),
        });

        Ok(Self {
            layout,
            registry,
            sessions,
            listener,
            rpc,
            coordinator: Arc::new(coordinator),
            state,
        })
    }

    /// Build, launch and watch every configured worker.
    pub async fn launch_workers(&self) {
        self.coordinator.start().await;
    }

    /// The HTTP app for the secure port.
    pub fn app(&self) -> Router {
        router(
            self.state.clone(),
            &self.coordinator.config().routes,
            &self.layout.static_dir(),
        )
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn registry_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc.local_addr()
    }

    /// Stop workers and listeners, then remove the run directory.
    pub async fn shutdown(mut self) {
        self.coordinator.shutdown();
        self.listener.stop().await;
        self.rpc.stop().await;
        if let Err(e) = self.layout.clean() {
            tracing::warn!("Failed to clean {}: {e}", self.layout.run_dir().display());
        }
        info!("Spindle stopped");
    }
}

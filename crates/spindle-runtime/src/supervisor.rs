//! Worker process supervisor.
//!
//! Launches a route's installed binary with its identity in the environment
//! and the child's stdio attached to ours. Starting never waits for the
//! worker; a reaper task logs how it exits. All children are killed when the
//! supervisor shuts down.

use std::net::SocketAddr;
use std::process::Stdio;

use spindle_protocol::env;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::route::ProjectLayout;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("could not run worker {route}: {source}")]
    Spawn {
        route: String,
        #[source]
        source: std::io::Error,
    },
}

/// Addresses handed to every worker.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub registry_addr: SocketAddr,
    pub rpc_addr: SocketAddr,
}

pub struct Supervisor {
    layout: ProjectLayout,
    config: SupervisorConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    pub fn new(layout: ProjectLayout, config: SupervisorConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            layout,
            config,
            shutdown_tx,
        }
    }

    /// Start the worker for `route`. Returns the child's pid.
    pub fn start(&self, route: &str, authorizer: bool) -> Result<Option<u32>, SupervisorError> {
        let binary = self.layout.endpoint_path(route);
        info!("Starting worker {route}");

        let mut cmd = Command::new(&binary);
        cmd.current_dir(self.layout.root())
            .env(env::ROUTE, route)
            .env(env::REGISTRY_ADDR, self.config.registry_addr.to_string())
            .env(env::RPC_ADDR, self.config.rpc_addr.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if authorizer {
            cmd.env(env::AUTHORIZER, "1");
        }

        let mut child = cmd.spawn().map_err(|source| {
            error!("Could not run worker {route}: {source}");
            SupervisorError::Spawn {
                route: route.to_string(),
                source,
            }
        })?;
        let pid = child.id();

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let name = route.to_string();
        tokio::spawn(async move {
            // The watch guard must not live across the kill below.
            let stop = async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            };
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => info!("Worker {name} exited"),
                    Ok(status) => warn!("Worker {name} exited with {status}"),
                    Err(e) => warn!("Failed to wait on worker {name}: {e}"),
                },
                _ = stop => match child.kill().await {
                    Ok(()) => info!("Worker {name} terminated"),
                    Err(e) => warn!("Failed to kill worker {name}: {e}"),
                },
            }
        });

        Ok(pid)
    }

    /// Kill every worker this supervisor started.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    fn supervisor(dir: &TempDir) -> Supervisor {
        let layout = ProjectLayout::new(dir.path());
        layout.prepare().unwrap();
        Supervisor::new(
            layout,
            SupervisorConfig {
                registry_addr: "127.0.0.1:11000".parse().unwrap(),
                rpc_addr: "127.0.0.1:12000".parse().unwrap(),
            },
        )
    }

    fn install_script(dir: &TempDir, route: &str, body: &str) {
        let path = dir.path().join("bin/endpoints").join(route);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    async fn wait_for_file(path: &std::path::Path) -> String {
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(path) {
                if text.ends_with('\n') {
                    return text;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("{} never written", path.display());
    }

    #[tokio::test]
    async fn passes_identity_through_environment() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        install_script(
            &dir,
            "blog",
            "echo \"$ROUTE ${AUTHORIZER:-none} $SPINDLE_RPC_ADDR\" > env.out",
        );

        assert!(sup.start("blog", false).unwrap().is_some());
        let out = wait_for_file(&dir.path().join("env.out")).await;
        assert_eq!(out, "blog none 127.0.0.1:12000\n");
    }

    #[tokio::test]
    async fn authorizer_flag_is_set() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        install_script(&dir, "auth", "echo \"$ROUTE $AUTHORIZER\" > env.out");

        sup.start("auth", true).unwrap();
        let out = wait_for_file(&dir.path().join("env.out")).await;
        assert_eq!(out, "auth 1\n");
    }

    #[tokio::test]
    async fn shutdown_kills_running_workers() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        install_script(&dir, "blog", "echo started > up.out\nexec sleep 30");

        let pid = sup.start("blog", false).unwrap().unwrap();
        wait_for_file(&dir.path().join("up.out")).await;
        sup.shutdown();

        let proc_dir = std::path::PathBuf::from(format!("/proc/{pid}"));
        for _ in 0..100 {
            // Gone, or a zombie waiting to be reaped.
            let state = std::fs::read_to_string(proc_dir.join("stat")).unwrap_or_default();
            if state.is_empty() || state.contains(") Z") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("worker {pid} still running after shutdown");
    }

    #[tokio::test]
    async fn missing_binary_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir);
        assert!(matches!(sup.start("ghost", false), Err(SupervisorError::Spawn { .. })));
    }
}

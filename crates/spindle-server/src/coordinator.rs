//! Coordinator: ties builds, workers and live reload together.
//!
//! Startup builds every route, installs a debug page for the ones that fail,
//! and launches the rest. Each route's source directory is then watched: a
//! successful rebuild retires the running worker and starts a fresh one, a
//! failed rebuild leaves the running worker alone.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use spindle_runtime::{BuildError, BuildOutput, Builder, Route, SourceWatcher, Supervisor};
use tracing::{error, info, warn};

use crate::config::ProjectConfig;
use crate::registry::WorkerRegistry;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

pub struct Coordinator {
    config: ProjectConfig,
    builder: Builder,
    registry: WorkerRegistry,
    supervisor: Supervisor,
    watchers: Mutex<Vec<SourceWatcher>>,
    debounce: Duration,
}

impl Coordinator {
    pub fn new(config: ProjectConfig, builder: Builder, registry: WorkerRegistry, supervisor: Supervisor) -> Self {
        Self {
            config,
            builder,
            registry,
            supervisor,
            watchers: Mutex::new(Vec::new()),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Build every worker, launch the ones that built and start watching
    /// all of them.
    pub async fn start(self: &Arc<Self>) {
        let workers = self.config.workers();
        let launches = workers.iter().map(|(route, authorizer)| self.launch(route, *authorizer));
        futures_util::future::join_all(launches).await;

        for (route, authorizer) in workers {
            self.watch(route, authorizer);
        }
    }

    /// Build `route`. On failure its debug page is installed, unless a live
    /// worker is still serving the route.
    pub async fn build_route(&self, route: &Route) -> Result<BuildOutput, BuildError> {
        match self.builder.build(route).await {
            Ok(output) => Ok(output),
            Err(e) => {
                error!("Build of {} failed: {e}", route.name());
                if !self.registry.has_worker(route.name()) {
                    self.registry.install_debug(route.name(), e.page(route.name()));
                }
                Err(e)
            }
        }
    }

    /// Build and start the worker for `route`.
    pub async fn launch(&self, route: &Route, authorizer: bool) -> bool {
        if self.build_route(route).await.is_err() {
            return false;
        }
        self.supervisor.start(route.name(), authorizer).is_ok()
    }

    /// Rebuild after a source change and swap in a fresh worker.
    pub async fn reload(&self, route: &Route, authorizer: bool) {
        info!("Reloading {}", route.name());
        if self.build_route(route).await.is_err() {
            warn!("Keeping the current worker for {}", route.name());
            return;
        }

        let old = self.registry.retire(route.name());
        if let Err(e) = self.supervisor.start(route.name(), authorizer) {
            error!("Reload of {} could not start a worker: {e}", route.name());
        }
        if let Some(old) = old {
            if let Err(e) = old.close().await {
                warn!("Failed to close previous connection of {}: {e}", route.name());
            }
        }
    }

    fn watch(self: &Arc<Self>, route: Route, authorizer: bool) {
        let dir = self.builder.layout().source_dir(&route);
        let (watcher, mut ticks) = match SourceWatcher::spawn(&dir, !route.is_root(), self.debounce) {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Live reload disabled for {}: {e}", route.name());
                return;
            }
        };
        self.watchers.lock().push(watcher);

        let this = self.clone();
        tokio::spawn(async move {
            while ticks.recv().await.is_some() {
                this.reload(&route, authorizer).await;
            }
        });
    }

    /// Stop watching and kill every worker.
    pub fn shutdown(&self) {
        self.watchers.lock().clear();
        self.supervisor.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Endpoint;
    use spindle_runtime::{ProjectLayout, SupervisorConfig, ToolchainConfig};
    use spindle_transport::RegistrationSink;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    /// A toolchain that installs a do-nothing shell script, or fails when the
    /// source contains `BROKEN`.
    fn shell_toolchain() -> ToolchainConfig {
        let script = "if grep -q BROKEN \"$2\"; then echo '#error' >&2; echo \"$2:2:1:broken build\" >&2; exit 1; fi; \
                      printf '#!/bin/sh\\nexit 0\\n' > \"$1\"; chmod +x \"$1\"";
        ToolchainConfig {
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "sh".into(), "{out}".into(), "{src}".into()],
            entry: "main.go".into(),
        }
    }

    fn coordinator(dir: &TempDir) -> (Arc<Coordinator>, WorkerRegistry) {
        let layout = ProjectLayout::new(dir.path());
        layout.prepare().unwrap();
        let registry = WorkerRegistry::new();
        let supervisor = Supervisor::new(
            layout.clone(),
            SupervisorConfig {
                registry_addr: "127.0.0.1:1".parse().unwrap(),
                rpc_addr: "127.0.0.1:1".parse().unwrap(),
            },
        );
        let config = ProjectConfig {
            routes: vec![Route::new("/blog", "blog")],
            ..Default::default()
        };
        let coord = Coordinator::new(config, Builder::new(layout, shell_toolchain()), registry.clone(), supervisor);
        (Arc::new(coord), registry)
    }

    fn write_source(dir: &TempDir, body: &str) {
        std::fs::create_dir_all(dir.path().join("src/blog")).unwrap();
        std::fs::write(dir.path().join("src/blog/main.go"), body).unwrap();
    }

    #[tokio::test]
    async fn failed_build_installs_debug_endpoint() {
        let dir = TempDir::new().unwrap();
        write_source(&dir, "package main\nBROKEN\n");
        let (coord, registry) = coordinator(&dir);

        assert!(!coord.launch(&Route::new("/blog", "blog"), false).await);
        match registry.get("blog") {
            Some(Endpoint::Debug(page)) => assert!(page.html().contains("broken build")),
            other => panic!("expected debug endpoint, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn successful_build_launches_worker() {
        let dir = TempDir::new().unwrap();
        write_source(&dir, "package main\n");
        let (coord, _registry) = coordinator(&dir);

        assert!(coord.launch(&Route::new("/blog", "blog"), false).await);
        assert!(dir.path().join("bin/endpoints/blog").exists());
        coord.shutdown();
    }

    #[tokio::test]
    async fn failed_reload_keeps_live_worker() {
        let dir = TempDir::new().unwrap();
        write_source(&dir, "package main\nBROKEN\n");
        let (coord, registry) = coordinator(&dir);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        registry.register("blog".into(), server);

        coord.reload(&Route::new("/blog", "blog"), false).await;
        assert!(registry.has_worker("blog"));
    }

    #[tokio::test]
    async fn successful_reload_retires_and_closes_old_worker() {
        let dir = TempDir::new().unwrap();
        write_source(&dir, "package main\n");
        let (coord, registry) = coordinator(&dir);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        registry.register("blog".into(), server);

        coord.reload(&Route::new("/blog", "blog"), false).await;
        assert!(!registry.has_worker("blog"));

        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0, "old worker should see EOF");
        coord.shutdown();
    }
}

//! WorkerRegistry: which endpoint currently answers for each route.
//!
//! A route is bound either to a live worker connection or to the debug page
//! of its last failed build. Handles are replaced, never mutated: a rebuild
//! retires the old handle and the new worker registers a fresh one.
//!
//! Uses parking_lot::RwLock for the map; the lock is never held across an
//! `.await`. Writes to a worker's connection are serialized by the handle's
//! own async mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use spindle_protocol::SessionId;
use spindle_runtime::DebugPage;
use spindle_transport::RegistrationSink;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

/// The persistent registration connection of one worker.
pub struct WorkerHandle {
    name: String,
    writer: Mutex<OwnedWriteHalf>,
}

impl WorkerHandle {
    pub fn new(name: impl Into<String>, writer: OwnedWriteHalf) -> Self {
        Self {
            name: name.into(),
            writer: Mutex::new(writer),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Notify the worker of a new session: exactly the 32 id bytes.
    pub async fn send_session(&self, id: &SessionId) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(id.as_bytes()).await?;
        writer.flush().await
    }

    /// Shut down our side of the connection. The worker sees EOF.
    pub async fn close(&self) -> std::io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle").field("name", &self.name).finish()
    }
}

/// What answers requests for a route.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Worker(Arc<WorkerHandle>),
    Debug(Arc<DebugPage>),
}

#[derive(Default)]
struct Inner {
    endpoints: RwLock<HashMap<String, Endpoint>>,
    changed: Notify,
}

/// Route name → endpoint. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    inner: Arc<Inner>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Endpoint> {
        self.inner.endpoints.read().get(name).cloned()
    }

    /// The live worker for `name`, if any.
    pub fn worker(&self, name: &str) -> Option<Arc<WorkerHandle>> {
        match self.get(name)? {
            Endpoint::Worker(handle) => Some(handle),
            Endpoint::Debug(_) => None,
        }
    }

    pub fn has_worker(&self, name: &str) -> bool {
        self.worker(name).is_some()
    }

    /// Bind `name` to `handle`, returning what was there before.
    pub fn install_worker(&self, name: &str, handle: Arc<WorkerHandle>) -> Option<Endpoint> {
        let previous = self
            .inner
            .endpoints
            .write()
            .insert(name.to_string(), Endpoint::Worker(handle));
        self.inner.changed.notify_waiters();
        previous
    }

    /// Serve `page` for `name` until a worker registers.
    pub fn install_debug(&self, name: &str, page: DebugPage) -> Option<Endpoint> {
        let previous = self
            .inner
            .endpoints
            .write()
            .insert(name.to_string(), Endpoint::Debug(Arc::new(page)));
        self.inner.changed.notify_waiters();
        previous
    }

    /// Remove the live worker for `name`, leaving a debug entry untouched.
    pub fn retire(&self, name: &str) -> Option<Arc<WorkerHandle>> {
        let mut endpoints = self.inner.endpoints.write();
        if !matches!(endpoints.get(name), Some(Endpoint::Worker(_))) {
            return None;
        }
        match endpoints.remove(name) {
            Some(Endpoint::Worker(handle)) => Some(handle),
            _ => None,
        }
    }

    /// Remove `handle` only if it is still the one bound to `name`.
    pub fn remove_if_current(&self, name: &str, handle: &Arc<WorkerHandle>) -> bool {
        let mut endpoints = self.inner.endpoints.write();
        let current = matches!(endpoints.get(name), Some(Endpoint::Worker(h)) if Arc::ptr_eq(h, handle));
        if current {
            endpoints.remove(name);
        }
        current
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.endpoints.read().keys().cloned().collect()
    }

    /// Wait until a worker for `name` is registered, up to `timeout`.
    pub async fn wait_for_worker(&self, name: &str, timeout: Duration) -> Option<Arc<WorkerHandle>> {
        let wait = async {
            loop {
                let notified = self.inner.changed.notified();
                if let Some(handle) = self.worker(name) {
                    return handle;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    /// Drop the handle once the worker hangs up.
    fn watch_disconnect(&self, handle: Arc<WorkerHandle>, mut reader: OwnedReadHalf) {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => debug!("Ignoring {n} bytes from worker {}", handle.name()),
                    Err(e) => {
                        debug!("Worker {} connection error: {e}", handle.name());
                        break;
                    }
                }
            }
            if registry.remove_if_current(handle.name(), &handle) {
                info!("Worker {} disconnected", handle.name());
            }
        });
    }
}

impl RegistrationSink for WorkerRegistry {
    fn register(&self, name: String, stream: TcpStream) {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        let handle = Arc::new(WorkerHandle::new(name.clone(), writer));

        if let Some(Endpoint::Worker(old)) = self.install_worker(&name, handle.clone()) {
            warn!("Worker {name} registered again; closing the previous connection");
            tokio::spawn(async move {
                let _ = old.close().await;
            });
        }
        info!("Worker {name} registered");

        self.watch_disconnect(handle, reader);
    }
}

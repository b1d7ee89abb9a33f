//! Dispatcher: runs one HTTP request through a worker session.
//!
//! Mints the session id, notifies the route's worker over its registration
//! connection, then drains the session's chunk channel into a
//! [`ResponseTarget`] until the worker closes the session or the deadline
//! passes.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{StatusCode, header};
use bytes::Bytes;
use spindle_protocol::{Chunk, FormValues, SessionId};
use spindle_runtime::Route;
use tracing::{debug, error, warn};

use crate::pages;
use crate::registry::{Endpoint, WorkerRegistry};
use crate::sessions::{Session, SessionRequest, SessionStore};
use crate::target::ResponseTarget;

pub const SESSION_HEADER: &str = "x-spindle-session-id";
pub const SERVER_NAME: &str = "spindle";
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Separator for repeated query values merged into one argument.
const ARG_SEPARATOR: &str = "~";

/// An inbound request, reduced to what a session carries.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub remote: SocketAddr,
    pub method: String,
    pub form: FormValues,
    pub path_args: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub authorization: Option<String>,
}

impl DispatchRequest {
    pub fn new(remote: SocketAddr, method: impl Into<String>) -> Self {
        Self {
            remote,
            method: method.into(),
            form: FormValues::new(),
            path_args: HashMap::new(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            authorization: None,
        }
    }
}

/// How a dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The worker closed the session.
    Completed,
    /// No worker registered for the route.
    StillLoading,
    /// The route's last build failed; the diagnostic page was served.
    BuildFailed,
    /// The worker's connection could not be written.
    Unreachable,
    /// The deadline passed before the worker closed the session.
    TimedOut,
}

pub struct Dispatcher {
    registry: WorkerRegistry,
    sessions: Arc<SessionStore>,
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: WorkerRegistry, sessions: Arc<SessionStore>, default_timeout: Duration) -> Self {
        Self {
            registry,
            sessions,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub async fn dispatch<T: ResponseTarget>(&self, route: &Route, request: DispatchRequest, target: &mut T) -> Outcome {
        let name = route.name();
        let (id, session, rx) = self.open_session(route, request);

        target.set_header(SESSION_HEADER, &id.to_hex());
        target.set_header(header::SERVER.as_str(), SERVER_NAME);

        let handle = match self.registry.get(name) {
            None => {
                target.set_content_type("text/plain; charset=utf-8");
                target.write(Bytes::from(pages::still_loading(name))).await;
                return Outcome::StillLoading;
            }
            Some(Endpoint::Debug(page)) => {
                target.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                target.set_content_type("text/html; charset=utf-8");
                target.write(Bytes::copy_from_slice(page.html().as_bytes())).await;
                return Outcome::BuildFailed;
            }
            Some(Endpoint::Worker(handle)) => handle,
        };

        if !self.sessions.insert(session.clone()) {
            // Same remote, same second, same nonce.
            error!("Session id collision for {id}");
            target.set_status(StatusCode::SERVICE_UNAVAILABLE);
            return Outcome::Unreachable;
        }

        if let Err(e) = handle.send_session(&id).await {
            warn!("Could not notify worker {name}: {e}");
            self.sessions.remove(&id);
            session.close();
            target.set_status(StatusCode::BAD_GATEWAY);
            target.set_content_type("text/html; charset=utf-8");
            target.write(Bytes::from(pages::bad_gateway(name))).await;
            return Outcome::Unreachable;
        }
        debug!("Session {id:?} handed to worker {name}");

        let timeout = route
            .timeout_secs()
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let outcome = drain(&session, rx, target, timeout).await;

        self.sessions.remove(&id);
        if outcome == Outcome::TimedOut {
            session.close();
            warn!("Session {id:?} on {name} timed out after {timeout:?}");
            if !target.head_sent() {
                target.set_status(StatusCode::GATEWAY_TIMEOUT);
                target.set_content_type("text/html; charset=utf-8");
                target.write(Bytes::from(pages::gateway_timeout(name))).await;
            }
        }
        outcome
    }

    fn open_session(
        &self,
        route: &Route,
        request: DispatchRequest,
    ) -> (SessionId, Arc<Session>, tokio::sync::mpsc::Receiver<Chunk>) {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        let id = SessionId::generate(&request.remote.to_string(), secs);

        let arguments = merge_arguments(request.path_args, &request.query);
        let (session, rx) = Session::new(
            id,
            route.name(),
            SessionRequest {
                method: request.method,
                form: request.form,
                arguments,
                headers: request.headers,
                authorization: request.authorization,
            },
        );
        (id, session, rx)
    }
}

/// Stream chunks into `target` until the session closes or `timeout` passes.
async fn drain<T: ResponseTarget>(
    session: &Session,
    mut rx: tokio::sync::mpsc::Receiver<Chunk>,
    target: &mut T,
    timeout: Duration,
) -> Outcome {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut status_set = false;
    loop {
        tokio::select! {
            chunk = rx.recv() => match chunk {
                Some(chunk) => apply(chunk, target, &mut status_set).await,
                None => break,
            },
            _ = &mut deadline => return Outcome::TimedOut,
        }
    }

    tokio::select! {
        _ = session.closed() => Outcome::Completed,
        _ = &mut deadline => Outcome::TimedOut,
    }
}

async fn apply<T: ResponseTarget>(chunk: Chunk, target: &mut T, status_set: &mut bool) {
    let mut set_status = |target: &mut T, code: u16| {
        if *status_set {
            return;
        }
        if let Ok(status) = StatusCode::from_u16(code) {
            target.set_status(status);
            *status_set = true;
        }
    };

    match chunk {
        Chunk::SystemNotice(message) => {
            if !target.head_sent() {
                target.set_content_type("text/html; charset=utf-8");
            }
            target.write(Bytes::from(pages::notice(&message))).await;
        }
        Chunk::Header { name, value } => target.set_header(&name, &value),
        Chunk::ContentType(mime) => target.set_content_type(&mime),
        Chunk::Status(code) => set_status(&mut *target, code),
        Chunk::Body { status, bytes } => {
            if let Some(code) = status {
                set_status(&mut *target, code);
            }
            target.write(bytes).await;
        }
    }
}

/// Fold query parameters into the path arguments. Repeated query keys are
/// joined with `~`; a path argument always beats a query key of the same name.
pub fn merge_arguments(mut path_args: HashMap<String, String>, query: &[(String, String)]) -> HashMap<String, String> {
    let mut grouped: Vec<(&str, Vec<&str>)> = Vec::new();
    for (key, value) in query {
        match grouped.iter_mut().find(|(k, _)| *k == key.as_str()) {
            Some((_, values)) => values.push(value),
            None => grouped.push((key, vec![value])),
        }
    }

    for (key, values) in grouped {
        if path_args.contains_key(key) {
            warn!("Query parameter {key} collides with a path argument; keeping the path value");
            continue;
        }
        path_args.insert(key.to_string(), values.join(ARG_SEPARATOR));
    }
    path_args
}

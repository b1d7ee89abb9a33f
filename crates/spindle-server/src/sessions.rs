//! Session store: the state of every in-flight request, keyed by id.
//!
//! The dispatcher owns the receiving end of a session's chunk channel; the
//! bridge pushes chunks into it on behalf of the worker. Closing drops the
//! store's sender, so the channel ends once in-flight writes finish.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use spindle_protocol::{AcceptResult, Chunk, FormValues, RpcError, SessionId};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Chunks buffered per session before `session/write` blocks.
pub const CHUNK_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unknown session {0}")]
    Unknown(SessionId),
    #[error("session {0} is closed")]
    Closed(SessionId),
}

impl From<SessionError> for RpcError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Unknown(id) => RpcError::unknown_session(&id.to_hex()),
            SessionError::Closed(id) => RpcError::session_closed(&id.to_hex()),
        }
    }
}

/// Request context a worker sees through `session/accept`.
#[derive(Debug, Clone, Default)]
pub struct SessionRequest {
    pub method: String,
    pub form: FormValues,
    pub arguments: HashMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub authorization: Option<String>,
}

pub struct Session {
    id: SessionId,
    route: String,
    request: SessionRequest,
    sender: Mutex<Option<mpsc::Sender<Chunk>>>,
    done: watch::Sender<bool>,
}

impl Session {
    /// Create a session and the receiver its response is drained from.
    pub fn new(id: SessionId, route: impl Into<String>, request: SessionRequest) -> (Arc<Self>, mpsc::Receiver<Chunk>) {
        let (tx, rx) = mpsc::channel(CHUNK_CAPACITY);
        let (done, _) = watch::channel(false);
        let session = Arc::new(Self {
            id,
            route: route.into(),
            request,
            sender: Mutex::new(Some(tx)),
            done,
        });
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn snapshot(&self) -> AcceptResult {
        AcceptResult {
            method: self.request.method.clone(),
            form: self.request.form.clone(),
            arguments: self.request.arguments.clone(),
            headers: self.request.headers.clone(),
            authorization: self.request.authorization.clone(),
        }
    }

    /// Queue one chunk, waiting while the channel is full.
    pub async fn write(&self, chunk: Chunk) -> Result<(), SessionError> {
        let sender = self.sender.lock().clone().ok_or(SessionError::Closed(self.id))?;
        sender.send(chunk).await.map_err(|_| SessionError::Closed(self.id))
    }

    /// Close the channel and raise completion. Only the first call returns `true`.
    pub fn close(&self) -> bool {
        let was_open = self.sender.lock().take().is_some();
        if was_open {
            self.done.send_replace(true);
        }
        was_open
    }

    pub fn is_closed(&self) -> bool {
        *self.done.borrow()
    }

    /// Resolves once [`Session::close`] has been called.
    pub async fn closed(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Open sessions. Uses parking_lot::RwLock; never held across `.await`.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `session`. Returns `false` if its id is already in use.
    pub fn insert(&self, session: Arc<Session>) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id) {
            return false;
        }
        sessions.insert(session.id, session);
        true
    }

    pub fn get(&self, id: &SessionId) -> Result<Arc<Session>, SessionError> {
        self.sessions.read().get(id).cloned().ok_or(SessionError::Unknown(*id))
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    fn id(n: u16) -> SessionId {
        SessionId::from_parts("127.0.0.1:4000", 1_700_000_000, n)
    }

    fn body(s: &'static str) -> Chunk {
        Chunk::Body {
            status: None,
            bytes: Bytes::from_static(s.as_bytes()),
        }
    }

    #[tokio::test]
    async fn chunks_arrive_in_push_order() {
        let (session, mut rx) = Session::new(id(1), "blog", SessionRequest::default());
        for part in ["a", "b", "c"] {
            session.write(body(part)).await.unwrap();
        }
        assert!(session.close());

        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            if let Chunk::Body { bytes, .. } = chunk {
                out.extend_from_slice(&bytes);
            }
        }
        assert_eq!(out, b"abc");
    }

    #[tokio::test]
    async fn second_close_is_harmless() {
        let (session, _rx) = Session::new(id(2), "blog", SessionRequest::default());
        assert!(session.close());
        assert!(!session.close());
        assert!(session.is_closed());
        assert_eq!(session.write(body("late")).await, Err(SessionError::Closed(id(2))));
    }

    #[tokio::test]
    async fn full_channel_applies_backpressure() {
        let (session, mut rx) = Session::new(id(3), "blog", SessionRequest::default());
        for _ in 0..CHUNK_CAPACITY {
            session.write(body("x")).await.unwrap();
        }
        let blocked = tokio::time::timeout(Duration::from_millis(100), session.write(body("y"))).await;
        assert!(blocked.is_err());

        rx.recv().await.unwrap();
        session.write(body("y")).await.unwrap();
    }

    #[tokio::test]
    async fn closed_resolves_after_close() {
        let (session, _rx) = Session::new(id(4), "blog", SessionRequest::default());
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.closed().await })
        };
        session.close();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[test]
    fn store_rejects_duplicate_ids_and_reports_unknown() {
        let store = SessionStore::new();
        let (a, _rx_a) = Session::new(id(5), "blog", SessionRequest::default());
        let (b, _rx_b) = Session::new(id(5), "blog", SessionRequest::default());
        assert!(store.insert(a));
        assert!(!store.insert(b));
        assert_eq!(store.len(), 1);

        assert!(store.remove(&id(5)).is_some());
        assert!(store.is_empty());
        assert_eq!(store.get(&id(5)).err(), Some(SessionError::Unknown(id(5))));
    }

    #[test]
    fn snapshot_carries_request_context() {
        let request = SessionRequest {
            method: "POST".into(),
            arguments: HashMap::from([("slug".to_string(), "hello".to_string())]),
            authorization: Some("alice".into()),
            ..Default::default()
        };
        let (session, _rx) = Session::new(id(6), "blog", request);
        let snap = session.snapshot();
        assert_eq!(snap.method, "POST");
        assert_eq!(snap.arguments["slug"], "hello");
        assert_eq!(snap.authorization.as_deref(), Some("alice"));
        assert_eq!(session.route(), "blog");
    }
}

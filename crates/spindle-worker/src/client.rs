//! Session bridge client.
//!
//! One TCP connection, newline-delimited JSON-RPC. Requests go out through a
//! writer task; a reader task matches responses to callers by id through the
//! pending map, so any number of calls can be in flight at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use dashmap::DashMap;
use serde_json::{Value, json};
use spindle_protocol::{AcceptResult, Methods, RequestId, RpcRequest, RpcResponse, RpcResult, SessionId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::WorkerError;

type Pending = Arc<DashMap<i64, oneshot::Sender<RpcResult>>>;

pub struct RpcClient {
    out_tx: mpsc::Sender<String>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_id: AtomicI64,
}

impl RpcClient {
    pub async fn connect(addr: &str) -> Result<Self, WorkerError> {
        let stream = TcpStream::connect(addr).await.map_err(|source| WorkerError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        let _ = stream.set_nodelay(true);
        let (read_half, mut write_half) = stream.into_split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let pending: Pending = Arc::new(DashMap::new());

        tokio::spawn(async move {
            while let Some(mut line) = out_rx.recv().await {
                line.push('\n');
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    warn!("Session bridge write failed: {e}");
                    break;
                }
            }
        });

        let closed = Arc::new(AtomicBool::new(false));
        let pending_reader = pending.clone();
        let closed_reader = closed.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let response: RpcResponse = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(_) => {
                        debug!("Ignoring non-response line from bridge: {line}");
                        continue;
                    }
                };
                let Some(RequestId::Number(id)) = response.id().cloned() else {
                    warn!("Bridge response without a usable id: {line}");
                    continue;
                };
                if let Some((_, tx)) = pending_reader.remove(&id) {
                    let _ = tx.send(response.into_result());
                }
            }
            // Fail everything still waiting.
            closed_reader.store(true, Ordering::SeqCst);
            pending_reader.clear();
            debug!("Session bridge connection closed");
        });

        Ok(Self {
            out_tx,
            pending,
            closed,
            next_id: AtomicI64::new(1),
        })
    }

    /// Send one request and wait for its response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, WorkerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if self.closed.load(Ordering::SeqCst) {
            self.pending.remove(&id);
            return Err(WorkerError::Disconnected);
        }

        let line = serde_json::to_string(&RpcRequest::new(RequestId::Number(id), method, Some(params)))?;
        if self.out_tx.send(line).await.is_err() {
            self.pending.remove(&id);
            return Err(WorkerError::Disconnected);
        }

        rx.await.map_err(|_| WorkerError::Disconnected)?.map_err(WorkerError::from)
    }

    pub async fn accept(&self, session: &SessionId) -> Result<AcceptResult, WorkerError> {
        let value = self
            .call(Methods::SESSION_ACCEPT, json!({ "sessionId": session }))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn write(&self, session: &SessionId, payload: Vec<u8>, code: i32) -> Result<(), WorkerError> {
        let params = spindle_protocol::WriteParams {
            session_id: *session,
            payload,
            code,
        };
        self.call(Methods::SESSION_WRITE, serde_json::to_value(params)?)
            .await
            .map(|_| ())
    }

    /// Returns `false` if the session was already closed.
    pub async fn close(&self, session: &SessionId) -> Result<bool, WorkerError> {
        let value = self
            .call(Methods::SESSION_CLOSE, json!({ "sessionId": session }))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }
}

//! Session bridge server: newline-delimited JSON-RPC over TCP.
//!
//! Every incoming line is one request. Requests are queued per session id
//! and each queue is served by its own task, so calls for one session are
//! handled strictly in arrival order while a blocked session (a
//! `session/write` against a full channel) never holds up other sessions on
//! the same connection. Responses go back through a single writer task per
//! connection; responses for different sessions may interleave, so callers
//! match them by id.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use spindle_protocol::{Methods, RequestId, RpcError, RpcResponse, RpcResult};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Trait implemented by the server to handle bridge calls.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle a JSON-RPC request and return its result.
    fn handle_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> impl std::future::Future<Output = RpcResult> + Send;
}

/// Bridge listener configuration.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Hostname to bind to
    pub hostname: String,
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".into(),
            port: 12000,
        }
    }
}

/// Running bridge listener.
pub struct RpcServer {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl RpcServer {
    /// Bind and start serving bridge connections.
    pub async fn start<H: RequestHandler>(config: RpcConfig, handler: Arc<H>) -> std::io::Result<Self> {
        let listener = TcpListener::bind((config.hostname.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        info!("Session bridge listening on {local_addr}");

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                let handler = handler.clone();
                                tokio::spawn(async move {
                                    serve_connection(stream, peer, handler).await;
                                });
                            }
                            Err(e) => error!("Error accepting bridge connection: {e}"),
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

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Session bridge stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection handling
// ─────────────────────────────────────────────────────────────────────────────

async fn serve_connection<H: RequestHandler>(stream: TcpStream, peer: SocketAddr, handler: Arc<H>) {
    debug!("Bridge client connected: {peer}");

    let (read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);

    let writer = tokio::spawn(async move {
        while let Some(mut line) = out_rx.recv().await {
            line.push('\n');
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                warn!("Bridge write to {peer} failed: {e}");
                break;
            }
        }
    });

    // One ordered lane per session id.
    let mut lanes: HashMap<String, mpsc::UnboundedSender<Value>> = HashMap::new();
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                let request: Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(_) => {
                        let error = RpcResponse::error(None, RpcError::parse_error("Failed to parse JSON"));
                        let _ = out_tx.send(encode(&error)).await;
                        continue;
                    }
                };

                let key = lane_key(&request);
                let closes = request.get("method").and_then(Value::as_str) == Some(Methods::SESSION_CLOSE);
                let lane = lanes
                    .entry(key.clone())
                    .or_insert_with(|| spawn_lane(handler.clone(), out_tx.clone()));
                if lane.send(request).is_err() {
                    warn!("Bridge lane for {peer} stopped; dropping call");
                    lanes.remove(&key);
                    continue;
                }
                // Nothing valid follows a close; let the lane drain and exit.
                if closes {
                    lanes.remove(&key);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Bridge read from {peer} failed: {e}");
                break;
            }
        }
    }

    // Lanes hold their own sender clones; the writer drains them.
    drop(lanes);
    drop(out_tx);
    let _ = writer.await;
    debug!("Bridge client disconnected: {peer}");
}

/// Calls without a session id share the empty lane.
fn lane_key(request: &Value) -> String {
    request
        .get("params")
        .and_then(|p| p.get("sessionId"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn spawn_lane<H: RequestHandler>(handler: Arc<H>, out_tx: mpsc::Sender<String>) -> mpsc::UnboundedSender<Value> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let response = handle_message(request, &handler).await;
            if out_tx.send(response).await.is_err() {
                break;
            }
        }
    });
    tx
}

/// Validate and route one parsed request. Always yields a response line.
pub async fn handle_message<H: RequestHandler>(parsed: Value, handler: &Arc<H>) -> String {
    let jsonrpc = parsed.get("jsonrpc").and_then(|v| v.as_str());
    let method = parsed.get("method").and_then(|v| v.as_str());
    let id: Option<RequestId> = parsed.get("id").cloned().and_then(|v| serde_json::from_value(v).ok());

    let method = match (jsonrpc, method) {
        (Some("2.0"), Some(method)) => method,
        _ => {
            return encode(&RpcResponse::error(
                id,
                RpcError::invalid_request("Invalid JSON-RPC 2.0 request"),
            ));
        }
    };

    let params = parsed.get("params").cloned();

    match handler.handle_request(method, params).await {
        Ok(result) => encode(&RpcResponse::success(id.unwrap_or(RequestId::Number(0)), result)),
        Err(err) => encode(&RpcResponse::error(id, err)),
    }
}

fn encode(response: &RpcResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|_| {
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Failed to encode response"}}"#
            .to_string()
    })
}

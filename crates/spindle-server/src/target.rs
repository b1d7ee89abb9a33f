//! Response targets: where a dispatched session's output goes.
//!
//! [`StreamingTarget`] feeds a live HTTP response. The head (status and
//! headers) is handed over on the first body write, after which headers can
//! no longer change. [`CaptureTarget`] buffers everything in memory so the
//! authorization gate can inspect the authorizer's answer.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Body chunks buffered between the dispatcher and hyper.
const BODY_BUFFER: usize = 16;

pub trait ResponseTarget: Send {
    fn set_status(&mut self, status: StatusCode);

    fn set_header(&mut self, name: &str, value: &str);

    /// Append body bytes. Returns `false` once the client is gone.
    fn write(&mut self, bytes: Bytes) -> impl std::future::Future<Output = bool> + Send;

    /// Whether status and headers have been committed.
    fn head_sent(&self) -> bool;

    fn set_content_type(&mut self, mime: &str) {
        self.set_header(header::CONTENT_TYPE.as_str(), mime);
    }
}

fn parse_header(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        (Ok(n), Ok(v)) => Some((n, v)),
        _ => {
            warn!("Dropping invalid header {name:?}");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming
// ─────────────────────────────────────────────────────────────────────────────

pub struct StreamingTarget {
    status: StatusCode,
    headers: HeaderMap,
    head_tx: Option<oneshot::Sender<Response>>,
    body_tx: Option<mpsc::Sender<Bytes>>,
}

impl StreamingTarget {
    /// Returns the target and the receiver the HTTP handler awaits for the
    /// response head.
    pub fn new() -> (Self, oneshot::Receiver<Response>) {
        let (head_tx, head_rx) = oneshot::channel();
        (
            Self {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                head_tx: Some(head_tx),
                body_tx: None,
            },
            head_rx,
        )
    }

    fn send_head(&mut self) {
        let Some(head_tx) = self.head_tx.take() else {
            return;
        };
        let (body_tx, body_rx) = mpsc::channel::<Bytes>(BODY_BUFFER);
        let stream = futures_util::stream::unfold(body_rx, |mut rx| async move {
            rx.recv().await.map(|bytes| (Ok::<_, std::io::Error>(bytes), rx))
        });

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = self.status;
        *response.headers_mut() = std::mem::take(&mut self.headers);

        if head_tx.send(response).is_ok() {
            self.body_tx = Some(body_tx);
        }
    }

    /// Commit the head if nothing was written and end the body.
    pub fn finish(mut self) {
        self.send_head();
        self.body_tx.take();
    }
}

impl ResponseTarget for StreamingTarget {
    fn set_status(&mut self, status: StatusCode) {
        if self.head_sent() {
            warn!("Status {status} set after the response head was sent");
            return;
        }
        self.status = status;
    }

    fn set_header(&mut self, name: &str, value: &str) {
        if self.head_sent() {
            warn!("Header {name} set after the response head was sent");
            return;
        }
        if let Some((n, v)) = parse_header(name, value) {
            self.headers.insert(n, v);
        }
    }

    async fn write(&mut self, bytes: Bytes) -> bool {
        self.send_head();
        let Some(body_tx) = &self.body_tx else {
            return false;
        };
        if body_tx.send(bytes).await.is_err() {
            debug!("Client went away mid-response");
            self.body_tx = None;
            return false;
        }
        true
    }

    fn head_sent(&self) -> bool {
        self.head_tx.is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capture
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CaptureTarget {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

impl CaptureTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl ResponseTarget for CaptureTarget {
    fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    fn set_header(&mut self, name: &str, value: &str) {
        if let Some((n, v)) = parse_header(name, value) {
            self.headers.insert(n, v);
        }
    }

    async fn write(&mut self, bytes: Bytes) -> bool {
        self.body.extend_from_slice(&bytes);
        true
    }

    fn head_sent(&self) -> bool {
        false
    }
}

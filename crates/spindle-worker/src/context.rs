//! Per-request context handed to handlers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use spindle_protocol::chunk::{CODE_HEADER, CODE_SYSTEM_NOTICE, CONTENT_TYPE_MARKER};
use spindle_protocol::{AcceptResult, SessionId};

use crate::client::RpcClient;
use crate::error::WorkerError;

/// One accepted session. Everything a handler writes goes back to the
/// coordinator through the session bridge, in call order.
#[derive(Clone)]
pub struct Context {
    session: SessionId,
    request: Arc<AcceptResult>,
    client: Arc<RpcClient>,
}

impl Context {
    pub(crate) fn new(session: SessionId, request: AcceptResult, client: Arc<RpcClient>) -> Self {
        Self {
            session,
            request: Arc::new(request),
            client,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn form(&self) -> &BTreeMap<String, Vec<String>> {
        &self.request.form
    }

    /// First value submitted for `key`.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.request.form.get(key)?.first().map(String::as_str)
    }

    /// Path arguments merged with query parameters.
    pub fn arguments(&self) -> &HashMap<String, String> {
        &self.request.arguments
    }

    pub fn argument(&self, key: &str) -> Option<&str> {
        self.request.arguments.get(key).map(String::as_str)
    }

    /// Request header by lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers.get(name).map(String::as_str)
    }

    /// What the authorizer answered, on protected routes.
    pub fn authorization(&self) -> Option<&str> {
        self.request.authorization.as_deref()
    }

    pub async fn write(&self, bytes: impl Into<Vec<u8>>) -> Result<(), WorkerError> {
        self.client.write(&self.session, bytes.into(), 0).await
    }

    /// Write body bytes, setting the status if none was set yet.
    pub async fn write_with_status(&self, status: u16, bytes: impl Into<Vec<u8>>) -> Result<(), WorkerError> {
        self.client.write(&self.session, bytes.into(), i32::from(status)).await
    }

    pub async fn echo(&self, text: impl AsRef<str>) -> Result<(), WorkerError> {
        self.write(text.as_ref().as_bytes()).await
    }

    pub async fn set_header(&self, name: &str, value: &str) -> Result<(), WorkerError> {
        self.client
            .write(&self.session, format!("{name}={value}").into_bytes(), CODE_HEADER)
            .await
    }

    /// The first status set for a response wins.
    pub async fn set_status(&self, status: u16) -> Result<(), WorkerError> {
        self.client.write(&self.session, Vec::new(), i32::from(status)).await
    }

    pub async fn set_content_type(&self, mime: &str) -> Result<(), WorkerError> {
        let mut payload = CONTENT_TYPE_MARKER.to_vec();
        payload.extend_from_slice(mime.as_bytes());
        self.client.write(&self.session, payload, 0).await
    }

    /// Have the coordinator render its notice page around `message`.
    pub async fn notice(&self, message: &str) -> Result<(), WorkerError> {
        self.client
            .write(&self.session, message.as_bytes().to_vec(), CODE_SYSTEM_NOTICE)
            .await
    }
}

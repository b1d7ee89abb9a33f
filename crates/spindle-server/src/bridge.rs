//! SessionBridge: serves `session/*` calls from workers against the
//! session store.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use spindle_protocol::{AcceptParams, Chunk, CloseParams, Methods, RpcError, RpcResult, WriteParams};
use spindle_transport::RequestHandler;
use tracing::{debug, warn};

use crate::sessions::{SessionError, SessionStore};

pub struct SessionBridge {
    sessions: Arc<SessionStore>,
}

impl SessionBridge {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    fn accept(&self, params: AcceptParams) -> RpcResult {
        let session = self.sessions.get(&params.session_id).map_err(reject)?;
        serde_json::to_value(session.snapshot()).map_err(|e| RpcError::internal(e.to_string()))
    }

    async fn write(&self, params: WriteParams) -> RpcResult {
        let session = self.sessions.get(&params.session_id).map_err(reject)?;
        let chunk = Chunk::from_wire(params.payload, params.code);
        session.write(chunk).await.map_err(reject)?;
        Ok(Value::Bool(true))
    }

    fn close(&self, params: CloseParams) -> RpcResult {
        let session = self.sessions.get(&params.session_id).map_err(reject)?;
        let closed = session.close();
        if !closed {
            debug!("Session {:?} closed twice", params.session_id);
        }
        Ok(Value::Bool(closed))
    }
}

impl RequestHandler for SessionBridge {
    async fn handle_request(&self, method: &str, params: Option<Value>) -> RpcResult {
        match method {
            Methods::SESSION_ACCEPT => self.accept(parse_params(params)?),
            Methods::SESSION_WRITE => self.write(parse_params(params)?).await,
            Methods::SESSION_CLOSE => self.close(parse_params(params)?),
            _ => Err(RpcError::method_not_found(method)),
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    let params = params.ok_or_else(|| RpcError::invalid_params("Missing params"))?;
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(e.to_string()))
}

fn reject(err: SessionError) -> RpcError {
    warn!("Bridge call rejected: {err}");
    err.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::{Session, SessionRequest};
    use serde_json::json;
    use spindle_protocol::{RpcErrorCode, SessionId};

    fn setup() -> (SessionBridge, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::new());
        (SessionBridge::new(store.clone()), store)
    }

    #[tokio::test]
    async fn accept_write_close_round() {
        let (bridge, store) = setup();
        let id = SessionId::from_parts("10.0.0.1:5000", 1, 1);
        let request = SessionRequest {
            method: "GET".into(),
            ..Default::default()
        };
        let (session, mut rx) = Session::new(id, "blog", request);
        store.insert(session);

        let accepted = bridge
            .handle_request("session/accept", Some(json!({ "sessionId": id.to_hex() })))
            .await
            .unwrap();
        assert_eq!(accepted["method"], "GET");

        let wrote = bridge
            .handle_request(
                "session/write",
                Some(json!({ "sessionId": id.to_hex(), "payload": "aGk=", "code": 201 })),
            )
            .await
            .unwrap();
        assert_eq!(wrote, json!(true));
        assert_eq!(
            rx.recv().await,
            Some(Chunk::Body {
                status: Some(201),
                bytes: "hi".into()
            })
        );

        let close = json!({ "sessionId": id.to_hex() });
        assert_eq!(bridge.handle_request("session/close", Some(close.clone())).await.unwrap(), json!(true));
        assert_eq!(bridge.handle_request("session/close", Some(close)).await.unwrap(), json!(false));
    }

    #[tokio::test]
    async fn unknown_session_is_a_structured_error() {
        let (bridge, _store) = setup();
        let id = SessionId::from_parts("10.0.0.1:5000", 1, 2);
        let err = bridge
            .handle_request("session/accept", Some(json!({ "sessionId": id.to_hex() })))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), RpcErrorCode::UnknownSession);
        assert_eq!(err.code, -32020);
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let (bridge, store) = setup();
        let id = SessionId::from_parts("10.0.0.1:5000", 1, 3);
        let (session, _rx) = Session::new(id, "blog", SessionRequest::default());
        store.insert(session.clone());
        session.close();

        let err = bridge
            .handle_request(
                "session/write",
                Some(json!({ "sessionId": id.to_hex(), "payload": "", "code": 0 })),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), RpcErrorCode::SessionClosed);
    }

    #[tokio::test]
    async fn malformed_params_and_unknown_methods() {
        let (bridge, _store) = setup();
        let err = bridge
            .handle_request("session/accept", Some(json!({ "sessionId": "zz" })))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), RpcErrorCode::InvalidParams);

        let err = bridge.handle_request("session/accept", None).await.unwrap_err();
        assert_eq!(err.error_code(), RpcErrorCode::InvalidParams);

        let err = bridge.handle_request("session/open", None).await.unwrap_err();
        assert_eq!(err.error_code(), RpcErrorCode::MethodNotFound);
    }
}

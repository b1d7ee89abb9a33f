//! Protocol layer tests: JSON-RPC envelope, bridge params, error codes.

#[cfg(test)]
mod tests {
    use serde_json::json;
    use spindle_protocol::methods::is_known_method;
    use spindle_protocol::*;

    // ─────────────────────────────────────────────────────────────────────
    // Envelope
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn request_without_params() {
        let req: RpcRequest = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "session/close"
        }))
        .unwrap();
        assert_eq!(req.method, Methods::SESSION_CLOSE);
        assert!(req.params.is_none());
        assert!(req.is_valid());
    }

    #[test]
    fn request_invalid_version() {
        let req = RpcRequest {
            jsonrpc: "1.0".into(),
            id: RequestId::Number(1),
            method: "session/accept".into(),
            params: None,
        };
        assert!(!req.is_valid());
    }

    #[test]
    fn error_response_carries_unknown_session_code() {
        let resp = RpcResponse::error(
            Some(RequestId::Number(3)),
            RpcError::unknown_session("00ff"),
        );
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["error"]["code"], -32020);
        assert_eq!(value["error"]["data"], "00ff");
        assert_eq!(value["id"], 3);

        let parsed: RpcResponse = serde_json::from_value(value).unwrap();
        let err = parsed.into_result().unwrap_err();
        assert_eq!(err.error_code(), RpcErrorCode::UnknownSession);
    }

    #[test]
    fn success_response_untagged_parse() {
        let parsed: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": "w-1",
            "result": true
        }))
        .unwrap();
        assert!(!parsed.is_error());
        assert_eq!(parsed.id(), Some(&RequestId::String("w-1".into())));
        assert_eq!(parsed.into_result().unwrap(), json!(true));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Bridge params
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn write_params_use_hex_id_and_base64_payload() {
        let sid = SessionId::from_parts("127.0.0.1:9", 1, 2);
        let params = WriteParams {
            session_id: sid,
            payload: b"{\"a\":1}".to_vec(),
            code: 200,
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["sessionId"], sid.to_hex());
        assert_eq!(value["payload"], "eyJhIjoxfQ==");

        let back: WriteParams = serde_json::from_value(value).unwrap();
        assert_eq!(back.session_id, sid);
        assert_eq!(back.payload, b"{\"a\":1}");
    }

    #[test]
    fn malformed_session_id_is_rejected() {
        let res: Result<CloseParams, _> = serde_json::from_value(json!({ "sessionId": "nope" }));
        assert!(res.is_err());
    }

    #[test]
    fn accept_result_defaults() {
        let parsed: AcceptResult = serde_json::from_value(json!({ "method": "GET" })).unwrap();
        assert_eq!(parsed.method, "GET");
        assert!(parsed.form.is_empty());
        assert!(parsed.arguments.is_empty());
        assert!(parsed.headers.is_empty());
        assert!(parsed.authorization.is_none());
    }

    #[test]
    fn known_methods() {
        assert!(is_known_method("session/accept"));
        assert!(is_known_method("session/write"));
        assert!(!is_known_method("session/open"));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Handshake + chunks
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn handshake_frame_layout() {
        let frame = handshake::encode("blog").unwrap();
        assert_eq!(&frame[..5], &MAGIC);
        assert_eq!(&frame[5..9], b"0004");
        assert_eq!(&frame[9..], b"blog");
        assert!(handshake::encode("").is_err());
    }

    #[test]
    fn chunk_wire_pairs_decode_back() {
        for chunk in [
            Chunk::Header { name: "X-A".into(), value: "1".into() },
            Chunk::ContentType("application/json".into()),
            Chunk::SystemNotice("maintenance".into()),
            Chunk::Status(204),
        ] {
            let (payload, code) = chunk.clone().into_wire();
            assert_eq!(Chunk::from_wire(payload, code), chunk);
        }
    }
}

//! Session bridge method names and their parameter/result shapes.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// All bridge method names.
pub struct Methods;

impl Methods {
    /// Pull the request context of a session.
    pub const SESSION_ACCEPT: &str = "session/accept";
    /// Push one response chunk.
    pub const SESSION_WRITE: &str = "session/write";
    /// Close the chunk stream and complete the session.
    pub const SESSION_CLOSE: &str = "session/close";

    pub const ALL: &[&str] = &[Self::SESSION_ACCEPT, Self::SESSION_WRITE, Self::SESSION_CLOSE];
}

/// Check if a method name is part of the bridge surface.
pub fn is_known_method(method: &str) -> bool {
    Methods::ALL.contains(&method)
}

/// Form and query values, keyed by field name.
pub type FormValues = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptParams {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}

/// Snapshot of a session's request context.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcceptResult {
    pub method: String,
    #[serde(default)]
    pub form: FormValues,
    #[serde(default)]
    pub arguments: HashMap<String, String>,
    /// Request headers, lowercased names. Repeated headers are joined with `, `.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Body captured from the authorizer, for protected routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteParams {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseParams {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

//! Session ids: the 32-byte token shared by both wire protocols.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Length of a session id on the registration connection.
pub const SESSION_ID_LEN: usize = 32;

/// Identifier of one in-flight request.
///
/// Derived as `SHA-256(remote ++ le_u64(unix_secs) ++ le_u16(nonce))`. On the
/// registration connection it travels as 32 raw bytes; inside JSON-RPC
/// payloads it is hex-encoded.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId([u8; SESSION_ID_LEN]);

impl SessionId {
    /// Mint a fresh id for a request from `remote` received at `unix_secs`.
    pub fn generate(remote: &str, unix_secs: i64) -> Self {
        Self::from_parts(remote, unix_secs, rand::random::<u16>())
    }

    /// Deterministic derivation with an explicit nonce.
    pub fn from_parts(remote: &str, unix_secs: i64, nonce: u16) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(remote.as_bytes());
        hasher.update((unix_secs as u64).to_le_bytes());
        hasher.update(nonce.to_le_bytes());
        Self(hasher.finalize().into())
    }

    pub fn from_bytes(bytes: [u8; SESSION_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the 64-character hex form.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; SESSION_ID_LEN];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix keeps log lines readable.
        write!(f, "SessionId({}…)", &self.to_hex()[..12])
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom("session id must be 64 hex characters"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_matches_manual_hash() {
        let id = SessionId::from_parts("10.0.0.1:4000", 1_700_000_000, 0x1234);

        let mut input = b"10.0.0.1:4000".to_vec();
        input.extend_from_slice(&1_700_000_000u64.to_le_bytes());
        input.extend_from_slice(&[0x34, 0x12]);
        let expected: [u8; 32] = Sha256::digest(&input).into();

        assert_eq!(id.as_bytes(), &expected);
    }

    #[test]
    fn distinct_addresses_in_same_second_differ() {
        let a = SessionId::from_parts("10.0.0.1:4000", 42, 7);
        let b = SessionId::from_parts("10.0.0.2:4000", 42, 7);
        assert_ne!(a, b);
    }

    #[test]
    fn hex_form_parses_back() {
        let id = SessionId::generate("127.0.0.1:1", 1);
        assert_eq!(SessionId::from_hex(&id.to_hex()), Some(id));
        assert_eq!(SessionId::from_hex("abc"), None);
    }
}

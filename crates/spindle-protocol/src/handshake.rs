//! Registration handshake framing.
//!
//! A worker opens a TCP connection to the registration port and sends:
//!
//! ```text
//! +-----------------+----------------------+-------------------+
//! | magic (5 bytes) | name length (4 ASCII | name (N bytes,    |
//! | 62 72 75 74 65  | decimal digits)      | UTF-8)            |
//! +-----------------+----------------------+-------------------+
//! ```
//!
//! After that the connection only carries coordinator → worker traffic:
//! one 32-byte session id per routed request.

use thiserror::Error;

/// Magic prefix every registration must start with.
pub const MAGIC: [u8; 5] = [0x62, 0x72, 0x75, 0x74, 0x65];

/// Width of the ASCII length field.
pub const LENGTH_FIELD_LEN: usize = 4;

/// Longest name the length field can describe.
pub const MAX_NAME_LEN: usize = 9999;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("magic mismatch: {0:02x?}")]
    BadMagic([u8; 5]),
    #[error("length field is not 4 ASCII digits: {0:?}")]
    BadLength([u8; LENGTH_FIELD_LEN]),
    #[error("route name must be 1..={MAX_NAME_LEN} bytes, got {0}")]
    NameLength(usize),
    #[error("route name is not valid UTF-8")]
    NameEncoding,
    #[error("handshake timed out")]
    Timeout,
    #[error("i/o error during handshake: {0}")]
    Io(#[from] std::io::Error),
}

/// Validate the magic prefix.
pub fn check_magic(bytes: &[u8; 5]) -> Result<(), HandshakeError> {
    if *bytes == MAGIC {
        Ok(())
    } else {
        Err(HandshakeError::BadMagic(*bytes))
    }
}

/// Decode the 4-digit length field.
pub fn parse_length(field: &[u8; LENGTH_FIELD_LEN]) -> Result<usize, HandshakeError> {
    if !field.iter().all(u8::is_ascii_digit) {
        return Err(HandshakeError::BadLength(*field));
    }
    let len = field
        .iter()
        .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0'));
    if len == 0 {
        return Err(HandshakeError::NameLength(0));
    }
    Ok(len)
}

/// Decode the route name bytes.
pub fn parse_name(bytes: Vec<u8>) -> Result<String, HandshakeError> {
    String::from_utf8(bytes).map_err(|_| HandshakeError::NameEncoding)
}

/// Build the full registration frame for `name`.
pub fn encode(name: &str) -> Result<Vec<u8>, HandshakeError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(HandshakeError::NameLength(name.len()));
    }
    let mut frame = Vec::with_capacity(MAGIC.len() + LENGTH_FIELD_LEN + name.len());
    frame.extend_from_slice(&MAGIC);
    frame.extend_from_slice(format!("{:04}", name.len()).as_bytes());
    frame.extend_from_slice(name.as_bytes());
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_blog_registration() {
        let frame = encode("blog").unwrap();
        assert_eq!(frame, b"brute0004blog");
    }

    #[test]
    fn rejects_wrong_magic() {
        assert!(matches!(check_magic(b"bRUTE"), Err(HandshakeError::BadMagic(_))));
        assert!(check_magic(&MAGIC).is_ok());
    }

    #[test]
    fn length_field_must_be_digits() {
        assert_eq!(parse_length(b"0042").unwrap(), 42);
        assert!(parse_length(b"00x2").is_err());
        assert!(parse_length(b"0000").is_err());
    }
}

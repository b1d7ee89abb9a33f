//! Response chunks pushed by a worker for one session.
//!
//! On the wire a chunk is a `(payload, code)` pair. Two codes are reserved
//! (`700` system notice, `40` header directive) and a payload starting with
//! the `~ct` marker is a content-type directive. Every other code is an HTTP
//! status for the body bytes that come with it.

use bytes::Bytes;

/// Code for a rendered system-notice page.
pub const CODE_SYSTEM_NOTICE: i32 = 700;
/// Code for a `key=value` header directive.
pub const CODE_HEADER: i32 = 40;
/// Payload prefix marking a content-type directive.
pub const CONTENT_TYPE_MARKER: &[u8; 3] = b"~ct";

/// One decoded unit of response data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Body bytes, optionally carrying the response status.
    Body { status: Option<u16>, bytes: Bytes },
    /// Set a response header.
    Header { name: String, value: String },
    /// Set `Content-Type`.
    ContentType(String),
    /// Render the notice template around this message.
    SystemNotice(String),
    /// A bare status code with no body bytes.
    Status(u16),
}

fn valid_status(code: i32) -> Option<u16> {
    (100..=999).contains(&code).then_some(code as u16)
}

impl Chunk {
    /// Decode a wire pair.
    pub fn from_wire(payload: Vec<u8>, code: i32) -> Self {
        match code {
            CODE_SYSTEM_NOTICE => {
                Self::SystemNotice(String::from_utf8_lossy(&payload).into_owned())
            }
            CODE_HEADER => {
                let text = String::from_utf8_lossy(&payload);
                // Split only; the value keeps its own whitespace.
                let (name, value) = text.split_once('=').unwrap_or((text.as_ref(), ""));
                Self::Header {
                    name: name.to_string(),
                    value: value.to_string(),
                }
            }
            _ if payload.starts_with(CONTENT_TYPE_MARKER) => Self::ContentType(
                String::from_utf8_lossy(&payload[CONTENT_TYPE_MARKER.len()..]).into_owned(),
            ),
            _ => match valid_status(code) {
                Some(status) if payload.is_empty() => Self::Status(status),
                status => Self::Body {
                    status,
                    bytes: Bytes::from(payload),
                },
            },
        }
    }

    /// Encode back into a wire pair.
    pub fn into_wire(self) -> (Vec<u8>, i32) {
        match self {
            Self::Body { status, bytes } => (bytes.to_vec(), status.map_or(0, i32::from)),
            Self::Header { name, value } => (format!("{name}={value}").into_bytes(), CODE_HEADER),
            Self::ContentType(mime) => {
                let mut payload = CONTENT_TYPE_MARKER.to_vec();
                payload.extend_from_slice(mime.as_bytes());
                (payload, 0)
            }
            Self::SystemNotice(text) => (text.into_bytes(), CODE_SYSTEM_NOTICE),
            Self::Status(status) => (Vec::new(), i32::from(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_directive_splits_at_first_equals() {
        let chunk = Chunk::from_wire(b"Set-Cookie=a=b".to_vec(), 40);
        assert_eq!(
            chunk,
            Chunk::Header {
                name: "Set-Cookie".into(),
                value: "a=b".into()
            }
        );
    }

    #[test]
    fn header_value_whitespace_is_preserved() {
        let chunk = Chunk::from_wire(b"X-Pad=  spaced ".to_vec(), 40);
        assert_eq!(
            chunk,
            Chunk::Header {
                name: "X-Pad".into(),
                value: "  spaced ".into()
            }
        );
    }

    #[test]
    fn content_type_marker_wins_over_status() {
        let chunk = Chunk::from_wire(b"~cttext/plain".to_vec(), 200);
        assert_eq!(chunk, Chunk::ContentType("text/plain".into()));
    }

    #[test]
    fn status_codes() {
        assert_eq!(Chunk::from_wire(Vec::new(), 404), Chunk::Status(404));
        assert_eq!(
            Chunk::from_wire(b"hi".to_vec(), 0),
            Chunk::Body { status: None, bytes: Bytes::from_static(b"hi") }
        );
        assert_eq!(
            Chunk::from_wire(b"{}".to_vec(), 201),
            Chunk::Body { status: Some(201), bytes: Bytes::from_static(b"{}") }
        );
    }

    #[test]
    fn notice_code() {
        assert_eq!(
            Chunk::from_wire(b"boom".to_vec(), 700),
            Chunk::SystemNotice("boom".into())
        );
    }
}

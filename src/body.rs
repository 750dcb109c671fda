//! Request body classification and serialisation.
//!
//! The body kind decides both the bytes that go on the wire and whether a
//! `Content-Type` is set: only structured JSON values set one. A stream
//! body is not replayable, so it clamps the retry budget to zero before
//! the first byte is written.

use crate::constants;
use crate::error::Error;
use bytes::Bytes;
use serde_json::Value;

#[derive(Default)]
pub enum Body {
    #[default]
    None,
    /// Raw bytes, sent as-is.
    Bytes(Bytes),
    /// UTF-8 text, sent as-is.
    Text(String),
    /// Structured value, serialised to JSON. Design-document callables are
    /// already held as source text, so serialisation is plain serde.
    Json(Value),
    /// Byte stream, sent chunked. Disables retries.
    Stream(reqwest::Body),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("Body::None"),
            Self::Bytes(b) => write!(f, "Body::Bytes({} bytes)", b.len()),
            Self::Text(t) => write!(f, "Body::Text({} chars)", t.len()),
            Self::Json(_) => f.write_str("Body::Json"),
            Self::Stream(_) => f.write_str("Body::Stream"),
        }
    }
}

impl Body {
    /// True for byte-stream bodies, whose content cannot be replayed
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Serialise into the wire form consumed by the dispatch loop.
    ///
    /// # Errors
    ///
    /// Returns an error if a structured value fails to serialise.
    pub fn prepare(self) -> Result<PreparedBody, Error> {
        match self {
            Self::None => Ok(PreparedBody::Empty),
            Self::Bytes(bytes) => Ok(PreparedBody::Bytes {
                bytes,
                content_type: None,
            }),
            Self::Text(text) => Ok(PreparedBody::Bytes {
                bytes: Bytes::from(text),
                content_type: None,
            }),
            Self::Json(value) => Ok(PreparedBody::Bytes {
                bytes: Bytes::from(serde_json::to_vec(&value)?),
                content_type: Some(constants::CONTENT_TYPE_JSON),
            }),
            Self::Stream(stream) => Ok(PreparedBody::Stream(Some(stream))),
        }
    }
}

/// Wire-ready body. `Bytes` is cheap to clone and replayable across retry
/// attempts; `Stream` can be taken exactly once.
pub enum PreparedBody {
    Empty,
    Bytes {
        bytes: Bytes,
        content_type: Option<&'static str>,
    },
    Stream(Option<reqwest::Body>),
}

impl PreparedBody {
    /// The `Content-Type` this body mandates, if any
    #[must_use]
    pub const fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Bytes { content_type, .. } => *content_type,
            _ => None,
        }
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_body_sets_content_type() {
        let prepared = Body::Json(json!({"language": "javascript"}))
            .prepare()
            .unwrap();
        assert_eq!(prepared.content_type(), Some("application/json"));
        match prepared {
            PreparedBody::Bytes { bytes, .. } => {
                assert_eq!(&bytes[..], br#"{"language":"javascript"}"#);
            }
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn text_body_sets_no_content_type() {
        let prepared = Body::from("plain").prepare().unwrap();
        assert_eq!(prepared.content_type(), None);
        match prepared {
            PreparedBody::Bytes { bytes, .. } => assert_eq!(&bytes[..], b"plain"),
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn absent_body_is_empty() {
        assert!(matches!(
            Body::None.prepare().unwrap(),
            PreparedBody::Empty
        ));
    }

    #[test]
    fn stream_body_is_flagged() {
        let body = Body::Stream(reqwest::Body::from("chunked"));
        assert!(body.is_stream());
        assert!(!Body::from("text").is_stream());
    }
}

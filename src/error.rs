//! Error handling module for davenport
//!
//! All failures surface as one [`Error`] value. The taxonomy follows the
//! wire reality of the client:
//!
//! 1. **HTTP errors** are keyed by status code and expose predicate
//!    accessors (`is_not_found`, `is_conflict`, `is_precondition_failed`)
//! 2. **Transport errors** (refused, timeout, reset, DNS) are classified
//!    from the underlying `reqwest` failure; unclassifiable transport
//!    failures are wrapped as `InternalServerError`
//! 3. **`BadGateway`** is the only HTTP-ish error the pipeline synthesises:
//!    a response announced as JSON that cannot be parsed
//! 4. Construction-time errors (`InvalidConfig`) never reach the wire

use reqwest::StatusCode;
use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Keep essential external errors that can't be consolidated
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server answered with a status of 400 or above.
    #[error("HTTP {status} for {url}")]
    Http { status: StatusCode, url: String },

    /// The request never produced an HTTP response.
    #[error("transport error ({kind}): {message}")]
    Transport {
        kind: TransportKind,
        message: String,
    },

    /// A response announced as JSON could not be parsed.
    #[error("bad gateway: {reason}")]
    BadGateway { reason: String },

    /// Synthesised for unparseable view rows and for transport failures
    /// the socket-error catalogue cannot classify.
    #[error("internal server error: {message}")]
    InternalServerError {
        message: Cow<'static, str>,
        /// The offending response line, when raised by the row parser.
        line: Option<String>,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: Cow<'static, str> },

    /// The caller aborted the request before a terminal event fired.
    #[error("request aborted")]
    Aborted,
}

/// Classification of transport-level failures, mirroring the socket-error
/// catalogue of the underlying stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    ConnectionRefused,
    TimedOut,
    ConnectionReset,
    DnsFailure,
}

impl TransportKind {
    /// Get the string identifier for this transport error kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionRefused => "connection refused",
            Self::TimedOut => "timed out",
            Self::ConnectionReset => "connection reset",
            Self::DnsFailure => "dns failure",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Walks the source chain of a `reqwest` error looking for the underlying
/// `std::io::Error`, which carries the socket-level failure kind.
fn io_error_kind(error: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = cause.source();
    }
    None
}

impl Error {
    /// Create a typed HTTP error for a status of 400 or above
    #[must_use]
    pub fn http(status: StatusCode, url: impl Into<String>) -> Self {
        Self::Http {
            status,
            url: url.into(),
        }
    }

    /// Classify a transport-level `reqwest` failure.
    ///
    /// Known socket conditions map to [`Error::Transport`]; anything the
    /// catalogue cannot classify is wrapped as `InternalServerError`.
    #[must_use]
    pub fn from_transport(error: &reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            Some(TransportKind::TimedOut)
        } else {
            match io_error_kind(error) {
                Some(std::io::ErrorKind::ConnectionRefused) => {
                    Some(TransportKind::ConnectionRefused)
                }
                Some(
                    std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted,
                ) => Some(TransportKind::ConnectionReset),
                _ if error.is_connect() => Some(TransportKind::ConnectionRefused),
                _ => {
                    let message = error.to_string();
                    if message.contains("dns") {
                        Some(TransportKind::DnsFailure)
                    } else {
                        None
                    }
                }
            }
        };

        kind.map_or_else(
            || Self::InternalServerError {
                message: Cow::Owned(error.to_string()),
                line: None,
            },
            |kind| Self::Transport {
                kind,
                message: error.to_string(),
            },
        )
    }

    /// Create a bad gateway error for a JSON-announced body that failed to parse
    pub fn bad_gateway(reason: impl Into<String>) -> Self {
        Self::BadGateway {
            reason: reason.into(),
        }
    }

    /// Create the error the streaming parser raises on an unparseable row
    pub fn row_parse_failed(line: impl Into<String>) -> Self {
        Self::InternalServerError {
            message: Cow::Borrowed("unparseable view row"),
            line: Some(line.into()),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: Cow::Owned(reason.into()),
        }
    }

    /// Create the error raised when a user placeholder shadows a reserved name
    pub fn reserved_placeholder(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::InvalidConfig {
            reason: Cow::Owned(format!(
                "placeholder '{name}' collides with a reserved configuration or operation name"
            )),
        }
    }

    /// Create the error raised for a malformed `{…}` expression in a base URL
    pub fn unsupported_expression(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        let expression = expression.into();
        let reason = reason.into();
        Self::InvalidConfig {
            reason: Cow::Owned(format!(
                "unsupported placeholder expression '{{{expression}}}': {reason}"
            )),
        }
    }

    /// Create the error raised when a queried view is absent from the design document
    pub fn unknown_view(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::InvalidConfig {
            reason: Cow::Owned(format!("view '{name}' is not in the design document")),
        }
    }

    /// Create the error raised for view queries on a client without a design document
    #[must_use]
    pub const fn missing_design_document() -> Self {
        Self::InvalidConfig {
            reason: Cow::Borrowed("no design document configured"),
        }
    }

    /// Create the error raised when a list function is combined with a temporary view
    #[must_use]
    pub const fn list_with_temporary_view() -> Self {
        Self::InvalidConfig {
            reason: Cow::Borrowed("list functions cannot be used with temporary views"),
        }
    }

    /// The HTTP status this error represents, if any.
    ///
    /// Synthesised errors report the status of the class they imitate:
    /// `BadGateway` is 502 and a parser `InternalServerError` is 500.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::BadGateway { .. } => Some(StatusCode::BAD_GATEWAY),
            Self::InternalServerError { .. } => Some(StatusCode::INTERNAL_SERVER_ERROR),
            _ => None,
        }
    }

    /// True for an HTTP 404 response
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    /// True for an HTTP 409 response
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Http { status, .. } if *status == StatusCode::CONFLICT)
    }

    /// True for an HTTP 412 response
    #[must_use]
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, Self::Http { status, .. } if *status == StatusCode::PRECONDITION_FAILED)
    }
}

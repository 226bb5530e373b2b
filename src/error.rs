//! Error types for doozer-client.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{ErrorCode, Request, Response};

/// Main error type for all doozer operations.
#[derive(Debug, Error)]
pub enum DoozerError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protobuf encode error.
    #[error("Protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    /// Protobuf decode error. The stream is desynchronized.
    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// JSON error (configuration loading).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid frame on the wire (length prefix out of range).
    #[error("Framing error: {0}")]
    Framing(String),

    /// No address accepted a connection after every retry round.
    #[error("Can't connect to any of the addresses: {}", .addrs.join(", "))]
    Connect {
        /// Every configured address.
        addrs: Vec<String>,
    },

    /// The readiness gate stayed closed for the whole wait.
    #[error("Connection not ready after {0:?}")]
    NotReady(Duration),

    /// The socket (or its writer task) went away.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection was shut down for good.
    #[error("Client closed")]
    Closed,

    /// Every tag in `0..2^31` is in use.
    #[error("No free request tag")]
    TagsExhausted,

    /// No response arrived for a request in time.
    #[error("Request {tag} timed out after {timeout:?}")]
    Timeout {
        /// Tag of the abandoned request.
        tag: i32,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// The server answered with a known error code.
    #[error(transparent)]
    Response(#[from] Box<ResponseError>),

    /// The server answered with an error code this client does not know.
    #[error("Unrecognized error code {code} in response to {request:?}")]
    UnknownErrorCode {
        /// Raw code from the response.
        code: i32,
        /// The request that produced it.
        request: Box<Request>,
    },

    /// Malformed `doozer:` URI.
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl DoozerError {
    /// The classified server error code, if this is a server error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            DoozerError::Response(e) => Some(e.code),
            _ => None,
        }
    }

    /// True if no response arrived within the request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DoozerError::Timeout { .. })
    }
}

/// A failed operation reported by the server.
///
/// Carries the classified code along with the server's detail string and both
/// messages, so callers can react programmatically (e.g. refetch the revision
/// after [`ErrorCode::RevMismatch`] and resubmit).
#[derive(Debug, Error)]
pub struct ResponseError {
    /// Classified error code.
    pub code: ErrorCode,
    /// Optional detail string from the server.
    pub detail: Option<String>,
    /// The request that failed.
    pub request: Request,
    /// The raw response.
    pub response: Response,
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {:?} {:?}", self.code, self.request.verb(), self.request.path())?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

/// Result type alias using DoozerError.
pub type Result<T> = std::result::Result<T, DoozerError>;

/// Turn a response into a success or a classified failure.
///
/// A response without `err_code` is a success. A known code becomes
/// [`DoozerError::Response`]; any other code is a contract violation and
/// becomes [`DoozerError::UnknownErrorCode`].
pub fn classify(request: Request, response: Response) -> Result<Response> {
    let Some(code) = response.err_code else {
        return Ok(response);
    };

    match ErrorCode::from_code(code) {
        Some(code) => Err(DoozerError::Response(Box::new(ResponseError {
            code,
            detail: response.err_detail.clone(),
            request,
            response,
        }))),
        None => Err(DoozerError::UnknownErrorCode {
            code,
            request: Box::new(request),
        }),
    }
}
